//! The one-time handshake by which the two peers find each other.
//!
//! The server binds an ephemeral port, announces it, and waits; the
//! client connects to it and sends a single header-only datagram
//! carrying `RENDEZVOUS_ID`.  Whatever address that datagram came from
//! becomes the server's one and only peer.

use std::io;

use std::io::Write;
use std::net::{SocketAddr, UdpSocket};

use crate::address::{Address, EndpointPair};
use crate::err::*;
use crate::frame::{self, RENDEZVOUS_ID, HEADER_LEN};

/// Name under which the client side is installed; the first token of
/// the server's announcement.
pub const CLIENT_PROGRAM: &str = "tunnel-client";

fn local_address_of(socket: &UdpSocket) -> Result<Address, HLError> {
    match socket.local_addr()
        .map_err(|e| map_io_err(e, String::from("getsockname")))? {
        SocketAddr::V4(v4) => Ok(Address::from(v4)),
        SocketAddr::V6(v6) => Err(map_addr_err(
            io::Error::from(io::ErrorKind::Unsupported), v6.to_string())),
    }
}

/// Server side, before any peer has been heard from.
pub struct ListeningSocket {
    socket: UdpSocket,
}

impl ListeningSocket {
    /// Bind to any local address, on a port of the kernel's choosing.
    pub fn bind() -> Result<ListeningSocket, HLError> {
        ListeningSocket::bind_to(&Address::unspecified())
    }

    pub fn bind_to(addr: &Address) -> Result<ListeningSocket, HLError> {
        let socket = UdpSocket::bind(addr.to_socket_addr())
            .map_err(|e| map_io_err(e, format!("bind {}", addr)))?;
        Ok(ListeningSocket { socket })
    }

    pub fn local_address(&self) -> Result<Address, HLError> {
        local_address_of(&self.socket)
    }

    /// Write the line the launcher turns into a client command line:
    /// `<client-program> localhost <port> <egress-ip> <ingress-ip>`.
    pub fn announce<W: Write>(&self, out: &mut W, endpoints: &EndpointPair)
                              -> Result<(), HLError> {
        let port = self.local_address()?.port();
        writeln!(out, "{} localhost {} {} {}", CLIENT_PROGRAM, port,
                 endpoints.egress.ip(), endpoints.ingress.ip())
            .and_then(|_| out.flush())
            .map_err(|e| map_io_err(e, String::from("announcement")))
    }

    /// Block until the first datagram arrives, then restrict the socket
    /// to its sender.  There is no timeout.
    pub fn await_peer(self) -> Result<ConnectedSocket, HLError> {
        let mut buf = [0u8; HEADER_LEN];
        let peer = loop {
            let (len, from) = self.socket.recv_from(&mut buf)
                .map_err(|e| map_io_err(e, String::from("recvfrom")))?;
            match from {
                SocketAddr::V4(v4) => {
                    if !is_rendezvous(&buf[..len]) {
                        log::debug!("first datagram from {} is not a \
                                     rendezvous; accepting anyway", v4);
                    }
                    break Address::from(v4);
                },
                SocketAddr::V6(v6) => {
                    log::warn!("ignoring datagram from {}", v6);
                },
            }
        };
        log::info!("got connection from {}", peer.ip());

        self.socket.connect(peer.to_socket_addr())
            .map_err(|e| map_io_err(e, format!("connect {}", peer)))?;
        Ok(ConnectedSocket { socket: self.socket, peer })
    }
}

fn is_rendezvous(datagram: &[u8]) -> bool {
    match frame::decode(datagram) {
        Ok((id, payload)) => id == RENDEZVOUS_ID && payload.is_empty(),
        Err(_) => false,
    }
}

/// A socket that talks to exactly one peer for the rest of the
/// process's life.
#[derive(Debug)]
pub struct ConnectedSocket {
    socket: UdpSocket,
    peer: Address,
}

impl ConnectedSocket {
    /// Client side: connect to the announced server and send the
    /// rendezvous datagram.
    pub fn to_server(server: &Address) -> Result<ConnectedSocket, HLError> {
        let socket = UdpSocket::bind(Address::unspecified().to_socket_addr())
            .map_err(|e| map_io_err(e, String::from("bind")))?;
        socket.connect(server.to_socket_addr())
            .map_err(|e| map_io_err(e, format!("connect {}", server)))?;

        let connected = ConnectedSocket { socket, peer: *server };
        log::info!("client listening for server on port {}",
                   connected.local_address()?.port());

        connected.socket.send(&frame::rendezvous())
            .map_err(|e| map_io_err(e, format!("rendezvous with {}",
                                               server)))?;
        Ok(connected)
    }

    pub fn peer(&self) -> Address {
        self.peer
    }

    pub fn local_address(&self) -> Result<Address, HLError> {
        local_address_of(&self.socket)
    }

    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }
}
