//! Non-blocking UDP socket wrapper.
//!
//! Builds the socket through socket2 for buffer sizing, switches it
//! non-blocking, and sets the DF bit so path-MTU probes get ICMP feedback
//! instead of silent fragmentation.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info};

/// Socket buffer size for sustained transfer rates.
const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Receive buffer size; covers the largest probed MTU with headroom.
const RECV_BUF_SIZE: usize = 65536;

/// UDP transport bound to a local address.
pub struct UdpTransport {
    socket: UdpSocket,
    recv_buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind a non-blocking UDP socket with sized buffers and the DF bit.
    ///
    /// # Errors
    ///
    /// Propagates socket creation, option and bind failures.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        set_df(&socket);

        Ok(Self {
            socket,
            recv_buf: vec![0u8; RECV_BUF_SIZE],
        })
    }

    /// Receive one datagram.
    ///
    /// Returns the byte count and sender; the bytes are in
    /// [`recv_buffer`](Self::recv_buffer). Non-blocking: `WouldBlock` when
    /// nothing is queued.
    ///
    /// # Errors
    ///
    /// Propagates socket receive failures.
    pub fn recv_from(&mut self) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(&mut self.recv_buf)
    }

    /// The bytes of the last received datagram.
    #[must_use]
    pub fn recv_buffer(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Send one datagram.
    ///
    /// # Errors
    ///
    /// Propagates socket send failures, including `WouldBlock` on a full
    /// send buffer.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    /// The locally bound address.
    ///
    /// # Errors
    ///
    /// Propagates the socket query failure.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Set the DF bit for both address families, logging what took.
///
/// Path-MTU probing needs fragmentation off; kernels that refuse one
/// family still leave the other usable, so refusal is logged, not fatal.
#[cfg(target_os = "linux")]
fn set_df(socket: &UdpSocket) {
    use std::os::fd::AsRawFd;

    fn sockopt(fd: i32, level: i32, name: i32, value: i32) -> io::Result<()> {
        // SAFETY: fd is a valid open socket and the option value is a
        // plain c_int read by the kernel.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                std::ptr::addr_of!(value).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    let fd = socket.as_raw_fd();
    let df_v4 = sockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MTU_DISCOVER,
        libc::IP_PMTUDISC_DO,
    );
    let df_v6 = sockopt(
        fd,
        libc::IPPROTO_IPV6,
        libc::IPV6_MTU_DISCOVER,
        libc::IPV6_PMTUDISC_DO,
    );

    match (df_v4, df_v6) {
        (Ok(()), Ok(())) => info!("DF set for IPv4 and IPv6"),
        (Ok(()), Err(_)) => info!("DF set for IPv4 only"),
        (Err(_), Ok(())) => info!("DF set for IPv6 only"),
        (Err(e4), Err(e6)) => error!(?e4, ?e6, "setting DF failed for both families"),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_df(_socket: &UdpSocket) {
    info!("DF control not available on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_recv_would_block_when_idle() {
        let mut transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        match transport.recv_from() {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            Ok(_) => panic!("unexpected datagram"),
        }
    }
}
