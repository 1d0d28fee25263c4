//! TUN devices and the bits of interface and route configuration a
//! fresh network namespace needs before it is usable.
//!
//! Everything in here requires CAP_NET_ADMIN in the current network
//! namespace.  None of it is retried: a half-configured namespace is
//! not something we can recover from.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::ptr;

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

use crate::address::Address;
use crate::err::*;

/// Largest packet a single read can return.
pub const MAX_PACKET: usize = 65536;

mod ioctls {
    use std::mem;

    nix::ioctl_readwrite_bad!(tun_set_iff,
                              nix::request_code_write!(
                                  b'T', 202, mem::size_of::<libc::c_int>()),
                              libc::ifreq);
    nix::ioctl_write_ptr_bad!(set_if_addr, libc::SIOCSIFADDR, libc::ifreq);
    nix::ioctl_write_ptr_bad!(set_if_dstaddr, libc::SIOCSIFDSTADDR,
                              libc::ifreq);
    nix::ioctl_write_ptr_bad!(set_if_flags, libc::SIOCSIFFLAGS, libc::ifreq);
    nix::ioctl_write_ptr_bad!(add_route, libc::SIOCADDRT, libc::rtentry);
}

/// Internal: an ifreq with its name filled in.
fn ifreq_for(name: &str) -> Result<libc::ifreq, HLError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ || bytes.contains(&0) {
        return Err(map_io_err(io::Error::from(io::ErrorKind::InvalidInput),
                              format!("interface name {:?}", name)));
    }
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }
    Ok(ifr)
}

/// Internal: the name the kernel left in an ifreq.
fn ifreq_name(ifr: &libc::ifreq) -> String {
    let bytes: Vec<u8> = ifr.ifr_name.iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn to_sockaddr(ip: Ipv4Addr) -> libc::sockaddr {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(ip.octets()) },
        sin_zero: [0; 8],
    };
    unsafe { ptr::read(&sin as *const libc::sockaddr_in as *const libc::sockaddr) }
}

/// Internal: a throwaway socket to hang interface and route ioctls on.
fn ioctl_socket() -> Result<OwnedFd, HLError> {
    socket(AddressFamily::Inet, SockType::Datagram, SockFlag::SOCK_CLOEXEC,
           None)
        .map_err(|e| map_nix_err(e, String::from("socket")))
}

fn set_interface_up(sock: &OwnedFd, name: &str) -> Result<(), HLError> {
    let mut ifr = ifreq_for(name)?;
    ifr.ifr_ifru.ifru_flags = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    unsafe { ioctls::set_if_flags(sock.as_raw_fd(), &ifr) }
        .map_err(|e| map_nix_err(e, format!("ioctl SIOCSIFFLAGS {}", name)))?;
    Ok(())
}

/// Bring up `lo` in the current namespace.
pub fn bring_up_loopback() -> Result<(), HLError> {
    let sock = ioctl_socket()?;
    set_interface_up(&sock, "lo")
}

/// Route everything not otherwise routed via `gateway`.
pub fn add_default_route(gateway: &Address) -> Result<(), HLError> {
    let sock = ioctl_socket()?;
    let mut route: libc::rtentry = unsafe { mem::zeroed() };
    route.rt_gateway = to_sockaddr(gateway.ip());
    route.rt_dst = to_sockaddr(Ipv4Addr::UNSPECIFIED);
    route.rt_genmask = to_sockaddr(Ipv4Addr::UNSPECIFIED);
    route.rt_flags = (libc::RTF_UP | libc::RTF_GATEWAY) as libc::c_ushort;

    unsafe { ioctls::add_route(sock.as_raw_fd(), &route) }
        .map_err(|e| map_nix_err(e, String::from("ioctl SIOCADDRT")))?;
    Ok(())
}

/// A layer-3 TUN interface, configured as one end of a point-to-point
/// link and brought up.  The interface disappears with the namespace
/// (or when this handle is dropped).
#[derive(Debug)]
pub struct TunDevice {
    file: File,
    name: String,
}

impl TunDevice {
    pub fn new(name_hint: &str, local: &Address, peer: &Address)
               -> Result<TunDevice, HLError> {
        let file = OpenOptions::new().read(true).write(true)
            .open("/dev/net/tun")
            .map_err(|e| map_io_err(e, String::from("/dev/net/tun")))?;

        let mut ifr = ifreq_for(name_hint)?;
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;
        unsafe { ioctls::tun_set_iff(file.as_raw_fd(), &mut ifr) }
            .map_err(|e| map_nix_err(e, format!("ioctl TUNSETIFF {}",
                                                name_hint)))?;
        let name = ifreq_name(&ifr);
        log::debug!("created TUN device {} ({} <-> {})",
                    name, local.ip(), peer.ip());

        let sock = ioctl_socket()?;

        let mut ifr = ifreq_for(&name)?;
        ifr.ifr_ifru.ifru_addr = to_sockaddr(local.ip());
        unsafe { ioctls::set_if_addr(sock.as_raw_fd(), &ifr) }
            .map_err(|e| map_nix_err(e, format!("ioctl SIOCSIFADDR {}",
                                                name)))?;

        let mut ifr = ifreq_for(&name)?;
        ifr.ifr_ifru.ifru_dstaddr = to_sockaddr(peer.ip());
        unsafe { ioctls::set_if_dstaddr(sock.as_raw_fd(), &ifr) }
            .map_err(|e| map_nix_err(e, format!("ioctl SIOCSIFDSTADDR {}",
                                                name)))?;

        set_interface_up(&sock, &name)?;

        Ok(TunDevice { file, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read exactly one packet.  Only call this when the fd has polled
    /// readable.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    /// Inject exactly one packet.
    pub fn write(&self, packet: &[u8]) -> io::Result<()> {
        let n = (&self.file).write(packet)?;
        if n != packet.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero,
                                      format!("short write to TUN device \
                                               ({} of {} bytes)",
                                              n, packet.len())));
        }
        Ok(())
    }
}

impl AsFd for TunDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}
