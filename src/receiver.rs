use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::config::{ReceiverConfig, MAX_DATAGRAM_SIZE};
use crate::frame::{self, DecodeError};
use crate::reporter::{Report, Reporter};
use crate::shutdown::ShutdownListener;
use crate::socket::bind_receiver_socket;
use crate::stats::StatsAggregator;
use crate::tracker::SequenceTracker;

pub struct ReceiverLoop {
    socket: UdpSocket,
    tracker: SequenceTracker,
}

impl ReceiverLoop {
    pub fn new(socket: UdpSocket, stats: Arc<StatsAggregator>) -> ReceiverLoop {
        ReceiverLoop {
            socket,
            tracker: SequenceTracker::new(stats),
        }
    }

    /// Receives datagrams until shutdown is triggered. Errors in received data are counted in the
    ///  stats and never terminate the loop, only errors of the socket itself do.
    pub async fn run(self, mut shutdown: ShutdownListener) -> anyhow::Result<()> {
        let ReceiverLoop { socket, mut tracker } = self;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        debug!(local_addr = ?socket.local_addr(), "starting receive loop");

        loop {
            tokio::select! {
                r = socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, _from)) => {
                            handle_datagram(&mut tracker, &buf[..len]);
                        }
                        Err(e) => {
                            error!(error = ?e, "error receiving from datagram socket");
                            return Err(e.into());
                        }
                    }
                }
                _ = shutdown.triggered() => break,
            }
        }

        info!("receive loop stopped");
        Ok(())
    }
}

pub fn handle_datagram(tracker: &mut SequenceTracker, buf: &[u8]) {
    match frame::decode(buf) {
        Ok(frame) => tracker.process(frame.sequence, frame.tag, frame.payload),
        // stray traffic: neither counted nor logged
        Err(DecodeError::TooSmall { .. }) => {}
    }
}

/// Receives and reports concurrently until shutdown is triggered. Without a shutdown, this runs
///  until the process is killed.
pub async fn run_receiver(config: ReceiverConfig, shutdown: ShutdownListener) -> anyhow::Result<()> {
    let socket = bind_receiver_socket(config.bind_addr())?;
    println!("[+] Server listening on UDP port {}", config.port);

    let stats = Arc::new(StatsAggregator::new());

    let reporter = Reporter::new(stats.clone(), config.report_interval);
    let reporter_handle = tokio::spawn(reporter.run(shutdown.clone(), |report: &Report| println!("{}", report)));

    let result = ReceiverLoop::new(socket, stats).run(shutdown).await;

    // the reporter only stops by itself on shutdown, not after a socket error
    reporter_handle.abort();
    let _ = reporter_handle.await;
    result
}
