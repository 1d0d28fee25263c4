//! Endpoint addresses, and the private subnets handed out to each
//! end of a tunnel.

use std::fmt;
use std::io;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use crate::err::*;

/// An IPv4 host/port endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    pub fn new(ip: Ipv4Addr, port: u16) -> Address {
        Address { ip, port }
    }

    /// 0.0.0.0:0, i.e. "any address, any port".
    pub fn unspecified() -> Address {
        Address::new(Ipv4Addr::UNSPECIFIED, 0)
    }

    /// Resolve a host name or dotted quad to the first IPv4 address it
    /// maps to.
    pub fn resolve(host: &str, port: u16) -> Result<Address, HLError> {
        let addrs = (host, port).to_socket_addrs()
            .map_err(|e| map_addr_err(e, format!("{}:{}", host, port)))?;
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                return Ok(Address::from(v4));
            }
        }
        Err(map_addr_err(io::Error::new(io::ErrorKind::NotFound,
                                        "no IPv4 address"),
                         String::from(host)))
    }

    /// Parse a bare dotted quad; the port is zero.
    pub fn parse_ip(text: &str) -> Result<Address, HLError> {
        text.trim().parse::<Ipv4Addr>()
            .map(|ip| Address::new(ip, 0))
            .map_err(|e| map_addr_err(
                io::Error::new(io::ErrorKind::InvalidInput, e),
                format!("{:?}", text)))
    }

    pub fn ip(&self) -> Ipv4Addr { self.ip }
    pub fn port(&self) -> u16 { self.port }
    pub fn is_unspecified(&self) -> bool { self.ip.is_unspecified() }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl From<SocketAddrV4> for Address {
    fn from(sa: SocketAddrV4) -> Address {
        Address::new(*sa.ip(), sa.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Start of the pool that tunnel subnets are carved from (100.64.0.0/10).
const POOL_BASE: u32 = 0x6440_0000;
/// Number of /30 subnets in the pool.
const POOL_SLOTS: u32 = 1 << 20;

/// The outside-facing (egress) and inside-facing (ingress) addresses of
/// one tunnel's private /30.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointPair {
    pub egress: Address,
    pub ingress: Address,
}

impl EndpointPair {
    /// Pick the pair for a tunnel whose enclosing tunnel, if any, has
    /// `base` as its egress address.  Each nesting level moves one /30
    /// further along the pool, so an inner tunnel never reuses the
    /// subnet of the tunnel it runs in.  That only holds for bases
    /// inside the pool; callers reject the others with `in_pool`.
    pub fn derive(base: &Address) -> EndpointPair {
        let slot = if base.is_unspecified() {
            0
        } else {
            ((u32::from(base.ip) >> 2) + 1) % POOL_SLOTS
        };
        EndpointPair::for_slot(slot)
    }

    fn for_slot(slot: u32) -> EndpointPair {
        let net = POOL_BASE + (slot << 2);
        EndpointPair {
            egress: Address::new(Ipv4Addr::from(net + 1), 0),
            ingress: Address::new(Ipv4Addr::from(net + 2), 0),
        }
    }

    /// Whether `addr` lies in 100.64.0.0/10, the range `derive` hands
    /// out.
    pub fn in_pool(addr: &Address) -> bool {
        u32::from(addr.ip) & !(POOL_SLOTS * 4 - 1) == POOL_BASE
    }

    /// The pair as supplied on a client's command line.
    pub fn given(egress: Address, ingress: Address) -> EndpointPair {
        EndpointPair { egress, ingress }
    }
}
