use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, error, info, trace};

use crate::config::SenderConfig;
use crate::frame::{FrameEncoder, INITIAL_SEQUENCE};
use crate::shutdown::ShutdownListener;
use crate::socket::bind_sender_socket;

/// Outcome of a failed send attempt, as seen by the sender loop
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The OS has no buffer space right now - retrying later is expected to succeed
    #[error("send buffer is full: {0}")]
    BufferFull(io::Error),
    #[error("error sending datagram: {0}")]
    Fatal(io::Error),
}

impl From<io::Error> for SendError {
    fn from(e: io::Error) -> Self {
        let is_buffer_full = e.kind() == io::ErrorKind::WouldBlock
            || matches!(e.raw_os_error(), Some(code) if code == libc::ENOBUFS || code == libc::EAGAIN || code == libc::EWOULDBLOCK);

        if is_buffer_full {
            SendError::BufferFull(e)
        }
        else {
            SendError::Fatal(e)
        }
    }
}

/// Decouples the sender loop's state machine from the actual socket
#[cfg_attr(test, automock)]
pub trait DatagramSink: Send + Sync {
    /// A single non-blocking attempt: the datagram is either sent completely or not at all
    fn try_send(&self, buf: &[u8]) -> Result<(), SendError>;
}

pub struct UdpDatagramSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpDatagramSink {
    pub fn new(socket: UdpSocket, target: SocketAddr) -> UdpDatagramSink {
        UdpDatagramSink { socket, target }
    }
}

impl DatagramSink for UdpDatagramSink {
    fn try_send(&self, buf: &[u8]) -> Result<(), SendError> {
        self.socket.try_send_to(buf, self.target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SenderSummary {
    pub frames_sent: u64,
    pub buffer_full_retries: u64,
    /// sequence number of the next frame that would have been sent
    pub next_sequence: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SenderState {
    Sending,
    BufferFullBackoff,
}

pub struct SenderLoop<S: DatagramSink> {
    sink: S,
    config: SenderConfig,
}

impl<S: DatagramSink> SenderLoop<S> {
    pub fn new(sink: S, config: SenderConfig) -> anyhow::Result<SenderLoop<S>> {
        config.validate()?;
        Ok(SenderLoop { sink, config })
    }

    /// Sends frames with increasing sequence numbers until shutdown is triggered.
    ///
    /// A frame that could not be sent because the send buffer was full is re-sent verbatim
    ///  after a pause, the sequence number advances only after a successful send. Any other send
    ///  error terminates the loop.
    pub async fn run(&self, mut shutdown: ShutdownListener) -> anyhow::Result<SenderSummary> {
        let mut encoder = FrameEncoder::new(self.config.payload_size());
        let backoff = self.config.buffer_full_backoff();

        let mut summary = SenderSummary {
            frames_sent: 0,
            buffer_full_retries: 0,
            next_sequence: INITIAL_SEQUENCE,
        };
        // the encoder holds a frame that was encoded but not sent yet
        let mut has_pending_frame = false;
        let mut state = SenderState::Sending;

        debug!(peer = ?self.config.target(), payload_size = self.config.payload_size(), "starting sender loop");

        while !shutdown.is_triggered() {
            match state {
                SenderState::Sending => {
                    if !has_pending_frame {
                        encoder.encode(summary.next_sequence);
                        has_pending_frame = true;
                    }

                    match self.sink.try_send(encoder.frame()) {
                        Ok(()) => {
                            has_pending_frame = false;
                            summary.frames_sent += 1;
                            summary.next_sequence = summary.next_sequence.wrapping_add(1);

                            if self.config.inter_packet_delay.is_zero() {
                                tokio::task::yield_now().await;
                            }
                            else {
                                Self::pause(self.config.inter_packet_delay, &mut shutdown).await;
                            }
                        }
                        Err(SendError::BufferFull(e)) => {
                            trace!(error = ?e, sequence = summary.next_sequence, "send buffer full - backing off");
                            summary.buffer_full_retries += 1;
                            state = SenderState::BufferFullBackoff;
                        }
                        Err(e) => {
                            error!(error = ?e, sequence = summary.next_sequence, "fatal error sending frame");
                            return Err(e.into());
                        }
                    }
                }
                SenderState::BufferFullBackoff => {
                    Self::pause(backoff, &mut shutdown).await;
                    state = SenderState::Sending;
                }
            }
        }

        debug!(?summary, "sender loop stopped");
        Ok(summary)
    }

    async fn pause(duration: Duration, shutdown: &mut ShutdownListener) {
        tokio::select! {
            _ = sleep(duration) => {}
            _ = shutdown.triggered() => {}
        }
    }
}

/// Binds a socket and runs the sender loop on it until shutdown is triggered
pub async fn run_sender(config: SenderConfig, shutdown: ShutdownListener) -> anyhow::Result<SenderSummary> {
    let socket = bind_sender_socket(config.mtu * config.send_buffer_frames)?;
    let sink = UdpDatagramSink::new(socket, config.target());
    let sender_loop = SenderLoop::new(sink, config.clone())?;

    println!("[+] Sending UDP packets to {}:{} with MTU {} (payload {} bytes) and delay {:?}s",
             config.peer_addr, config.port, config.mtu, config.payload_size(), config.inter_packet_delay.as_secs_f64());

    let summary = sender_loop.run(shutdown).await?;

    println!("\n[!] Client stopped by user.");
    info!(frames_sent = summary.frames_sent, buffer_full_retries = summary.buffer_full_retries, "sender stopped");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use parking_lot::Mutex;
    use rstest::rstest;
    use tokio::time::Instant;
    use crate::frame::{self, decode, IntegrityTag};
    use crate::shutdown::ShutdownSignal;
    use super::*;

    fn config(mtu: usize, inter_packet_delay: Duration) -> SenderConfig {
        let mut config = SenderConfig::new(Ipv4Addr::LOCALHOST, mtu);
        config.inter_packet_delay = inter_packet_delay;
        config
    }

    fn sent_sequence(buf: &[u8]) -> u32 {
        let frame = decode(buf).unwrap();
        assert_eq!(frame.tag, IntegrityTag::new(frame.sequence, frame.payload));
        frame.sequence
    }

    #[rstest]
    #[case::would_block(io::Error::from(io::ErrorKind::WouldBlock), true)]
    #[case::no_buffer_space(io::Error::from_raw_os_error(libc::ENOBUFS), true)]
    #[case::again(io::Error::from_raw_os_error(libc::EAGAIN), true)]
    #[case::connection_refused(io::Error::from_raw_os_error(libc::ECONNREFUSED), false)]
    #[case::permission_denied(io::Error::from_raw_os_error(libc::EACCES), false)]
    #[case::network_unreachable(io::Error::from_raw_os_error(libc::ENETUNREACH), false)]
    #[case::other(io::Error::other("boom"), false)]
    fn test_classify_send_error(#[case] e: io::Error, #[case] expected_buffer_full: bool) {
        match SendError::from(e) {
            SendError::BufferFull(_) => assert!(expected_buffer_full),
            SendError::Fatal(_) => assert!(!expected_buffer_full),
        }
    }

    #[test]
    fn test_new_rejects_small_mtu() {
        assert!(SenderLoop::new(MockDatagramSink::new(), config(8, Duration::ZERO)).is_err());
        assert!(SenderLoop::new(MockDatagramSink::new(), config(9, Duration::ZERO)).is_ok());
    }

    #[rstest]
    #[case::no_retry(0)]
    #[case::single_retry(1)]
    #[case::several_retries(5)]
    #[tokio::test(start_paused = true)]
    async fn test_buffer_full_resends_same_frame(#[case] num_buffer_full: usize) {
        let shutdown = Arc::new(ShutdownSignal::new());
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let mut sink = MockDatagramSink::new();
        {
            let shutdown = shutdown.clone();
            let attempts = attempts.clone();
            sink.expect_try_send()
                .times(num_buffer_full + 1)
                .returning(move |buf: &[u8]| {
                    let mut attempts = attempts.lock();
                    attempts.push(buf.to_vec());
                    if attempts.len() <= num_buffer_full {
                        Err(SendError::BufferFull(io::Error::from_raw_os_error(libc::ENOBUFS)))
                    }
                    else {
                        shutdown.trigger();
                        Ok(())
                    }
                });
        }

        let sender_loop = SenderLoop::new(sink, config(100, Duration::ZERO)).unwrap();
        let start = Instant::now();
        let summary = sender_loop.run(shutdown.subscribe()).await.unwrap();

        assert_eq!(summary, SenderSummary {
            frames_sent: 1,
            buffer_full_retries: num_buffer_full as u64,
            next_sequence: 2,
        });
        assert!(start.elapsed() >= Duration::from_millis(10) * num_buffer_full as u32);

        let attempts = attempts.lock();
        assert_eq!(attempts.len(), num_buffer_full + 1);
        for attempt in attempts.iter() {
            assert_eq!(attempt.len(), 100);
            assert_eq!(sent_sequence(attempt), INITIAL_SEQUENCE);
            assert_eq!(attempt, &attempts[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_advances_after_success_only() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let sequences = Arc::new(Mutex::new(Vec::new()));

        let mut sink = MockDatagramSink::new();
        {
            let shutdown = shutdown.clone();
            let sequences = sequences.clone();
            let mut num_calls = 0;
            sink.expect_try_send()
                .returning(move |buf: &[u8]| {
                    num_calls += 1;
                    sequences.lock().push(sent_sequence(buf));
                    if num_calls == 8 {
                        shutdown.trigger();
                    }
                    if num_calls % 3 == 0 {
                        Err(io::Error::from(io::ErrorKind::WouldBlock).into())
                    }
                    else {
                        Ok(())
                    }
                });
        }

        let sender_loop = SenderLoop::new(sink, config(20, Duration::ZERO)).unwrap();
        let summary = sender_loop.run(shutdown.subscribe()).await.unwrap();

        assert_eq!(*sequences.lock(), vec![1, 2, 3, 3, 4, 5, 5, 6]);
        assert_eq!(summary, SenderSummary { frames_sent: 6, buffer_full_retries: 2, next_sequence: 7 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_packet_delay() {
        let shutdown = Arc::new(ShutdownSignal::new());

        let mut sink = MockDatagramSink::new();
        {
            let shutdown = shutdown.clone();
            let mut num_calls = 0;
            sink.expect_try_send()
                .times(3)
                .returning(move |_| {
                    num_calls += 1;
                    if num_calls == 3 {
                        shutdown.trigger();
                    }
                    Ok(())
                });
        }

        let sender_loop = SenderLoop::new(sink, config(50, Duration::from_millis(100))).unwrap();
        let start = Instant::now();
        let summary = sender_loop.run(shutdown.subscribe()).await.unwrap();

        assert_eq!(summary.frames_sent, 3);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_fatal_error_terminates() {
        let mut sink = MockDatagramSink::new();
        sink.expect_try_send()
            .times(1)
            .returning(|_| Err(io::Error::from_raw_os_error(libc::EACCES).into()));

        let shutdown = ShutdownSignal::new();
        let sender_loop = SenderLoop::new(sink, config(50, Duration::ZERO)).unwrap();
        assert!(sender_loop.run(shutdown.subscribe()).await.is_err());
    }

    #[tokio::test]
    async fn test_no_send_after_shutdown() {
        let mut sink = MockDatagramSink::new();
        sink.expect_try_send().never();

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let sender_loop = SenderLoop::new(sink, config(50, Duration::ZERO)).unwrap();
        let summary = sender_loop.run(shutdown.subscribe()).await.unwrap();
        assert_eq!(summary, SenderSummary { frames_sent: 0, buffer_full_retries: 0, next_sequence: INITIAL_SEQUENCE });
    }

    #[rstest]
    #[case::header_only(8)]
    #[case::above_udp_limit(65508)]
    #[tokio::test]
    async fn test_run_sender_rejects_invalid_mtu(#[case] mtu: usize) {
        let shutdown = ShutdownSignal::new();
        assert!(run_sender(config(mtu, Duration::ZERO), shutdown.subscribe()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let mut sink = MockDatagramSink::new();
        sink.expect_try_send()
            .returning(|_| Err(io::Error::from_raw_os_error(libc::ENOBUFS).into()));

        let shutdown = Arc::new(ShutdownSignal::new());
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(1005)).await;
                shutdown.trigger();
            });
        }

        let sender_loop = SenderLoop::new(sink, config(50, Duration::ZERO)).unwrap();
        let summary = sender_loop.run(shutdown.subscribe()).await.unwrap();

        assert_eq!(summary.frames_sent, 0);
        assert_eq!(summary.next_sequence, 1);
        assert!(summary.buffer_full_retries >= 100);
    }

    #[tokio::test]
    async fn test_udp_sink_sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = UdpDatagramSink::new(
            UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            receiver.local_addr().unwrap(),
        );

        let frame = frame::encode(9, 12);
        // readiness of a fresh socket is not known until the reactor had a turn
        sink.socket.writable().await.unwrap();
        sink.try_send(&frame).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &frame[..]);
    }
}
