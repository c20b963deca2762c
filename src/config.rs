use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{anyhow, bail};

use crate::frame::FRAME_HEADER_SIZE;

pub const DEFAULT_PORT: u16 = 5005;

/// Largest datagram the receiver accepts
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Largest UDP payload over IPv4: 65535 minus 20 bytes IP header and 8 bytes UDP header
pub const MAX_SENDER_MTU: usize = 65507;

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Sender(SenderConfig),
    Receiver(ReceiverConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    pub peer_addr: Ipv4Addr,
    pub port: u16,
    /// total size of each frame on the wire, including the frame header
    pub mtu: usize,
    pub inter_packet_delay: Duration,
    /// lower bound for the pause after the send buffer was full
    pub min_buffer_full_backoff: Duration,
    /// SO_SNDBUF is set to this multiple of the mtu (if the OS permits)
    pub send_buffer_frames: usize,
}

impl SenderConfig {
    pub fn new(peer_addr: Ipv4Addr, mtu: usize) -> SenderConfig {
        SenderConfig {
            peer_addr,
            port: DEFAULT_PORT,
            mtu,
            inter_packet_delay: Duration::ZERO,
            min_buffer_full_backoff: Duration::from_millis(10),
            send_buffer_frames: 2000,
        }
    }

    pub fn target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.peer_addr, self.port))
    }

    pub fn payload_size(&self) -> usize {
        self.mtu - FRAME_HEADER_SIZE
    }

    pub fn buffer_full_backoff(&self) -> Duration {
        self.inter_packet_delay.max(self.min_buffer_full_backoff)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu <= FRAME_HEADER_SIZE {
            bail!("mtu must be greater than the {} byte frame header, was {}", FRAME_HEADER_SIZE, self.mtu);
        }
        if self.mtu > MAX_SENDER_MTU {
            bail!("mtu must not exceed {} bytes (the largest UDP payload over IPv4), was {}", MAX_SENDER_MTU, self.mtu);
        }
        if self.port == 0 {
            bail!("target port must not be 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub port: u16,
    pub report_interval: Duration,
}

impl ReceiverConfig {
    pub fn new(port: u16) -> ReceiverConfig {
        ReceiverConfig {
            port,
            report_interval: crate::reporter::REPORT_INTERVAL,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// Immutable once created. The presence of a peer address selects the sender role.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub role: Role,
}

impl Config {
    pub fn new(peer_addr: Option<&str>, mtu: Option<usize>, port: u16, inter_packet_delay_secs: f64) -> anyhow::Result<Config> {
        let role = match (peer_addr, mtu) {
            (Some(peer_addr), Some(mtu)) => {
                let peer_addr: Ipv4Addr = peer_addr.parse()
                    .map_err(|e| anyhow!("invalid IPv4 address '{}': {}", peer_addr, e))?;

                if !inter_packet_delay_secs.is_finite() || inter_packet_delay_secs < 0.0 {
                    bail!("inter-packet delay must be a non-negative number of seconds, was {}", inter_packet_delay_secs);
                }

                let mut sender_config = SenderConfig::new(peer_addr, mtu);
                sender_config.port = port;
                sender_config.inter_packet_delay = Duration::from_secs_f64(inter_packet_delay_secs);
                sender_config.validate()?;
                Role::Sender(sender_config)
            }
            (Some(_), None) => bail!("an mtu is required when sending"),
            (None, _) => Role::Receiver(ReceiverConfig::new(port)),
        };

        Ok(Config { role })
    }
}
