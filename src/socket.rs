use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

// NB: these must be called from within a tokio runtime

pub fn bind_receiver_socket(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Binds to an ephemeral port on all interfaces. The send buffer is enlarged to
///  `send_buffer_size` if the OS permits it, high sending rates are limited by the buffer
///  otherwise.
pub fn bind_sender_socket(send_buffer_size: usize) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    match socket.set_send_buffer_size(send_buffer_size) {
        Ok(()) => debug!(requested = send_buffer_size, actual = ?socket.send_buffer_size(), "resized send buffer"),
        Err(e) => debug!(error = ?e, requested = send_buffer_size, "could not resize send buffer - continuing with the OS default"),
    }

    socket.set_nonblocking(true)?;
    let local_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&local_addr.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}
