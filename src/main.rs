use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use tracing::{debug, error, Level};
use udp_speedtest::config::{Config, Role, DEFAULT_PORT};
use udp_speedtest::receiver::run_receiver;
use udp_speedtest::sender::run_sender;
use udp_speedtest::shutdown::ShutdownSignal;

/// UDP speedtest for the local network or the internet: sends a stream of numbered datagrams, or
///  receives them and reports throughput and errors once per second
#[derive(Parser)]
struct Args {
    /// receiver's IPv4 address - runs as the sender if present, as the receiver otherwise
    #[clap(long, requires = "mtu")]
    ip: Option<String>,

    /// total size of each datagram in bytes, including the 8 byte header
    #[clap(long)]
    mtu: Option<usize>,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// pause between datagrams in seconds
    #[clap(long, default_value_t = 0.0)]
    delay: f64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let config = Config::new(args.ip.as_deref(), args.mtu, args.port, args.delay)?;
    debug!(?config, "starting");

    let shutdown = Arc::new(ShutdownSignal::new());

    match config.role {
        Role::Sender(sender_config) => {
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => shutdown.trigger(),
                        Err(e) => error!(error = ?e, "could not listen for Ctrl-C"),
                    }
                });
            }

            run_sender(sender_config, shutdown.subscribe()).await?;
        }
        Role::Receiver(receiver_config) => {
            // the receiver has no shutdown path of its own, it runs until the process is killed
            run_receiver(receiver_config, shutdown.subscribe()).await?;
        }
    }

    Ok(())
}
