//! Standing up one end of the link: everything that happens after the
//! rendezvous.  Both roles go through the same steps:
//!
//!  1. fork into a new network namespace;
//!  2. create and configure the TUN device, bring up `lo`, add the
//!     default route (still root);
//!  3. drop privileges for good and give the user back their
//!     environment;
//!  4. fork the user's command, and forward packets until it exits.
//!
//! The outer, still-privileged process does nothing but wait for the
//! namespace child and pass on its exit code.

use std::fs::File;

use std::io::BufWriter;
use std::net::UdpSocket;

use crate::address::{Address, EndpointPair};
use crate::environment::{self, SavedEnvironment, BASE_VAR};
use crate::err::*;
use crate::event_loop::EventLoop;
use crate::packet_log::PacketLog;
use crate::privileges::drop_privileges;
use crate::subprocess::{describe, ezexec, prepend_shell_prefix};
use crate::tun::{add_default_route, bring_up_loopback, TunDevice};
use crate::tunnel::TunnelEngine;

/// Which end of the link this process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Address of our own TUN interface.
    pub fn local(&self, endpoints: &EndpointPair) -> Address {
        match *self {
            Role::Server => endpoints.ingress,
            Role::Client => endpoints.egress,
        }
    }

    /// Address at the far end of the point-to-point link; also the
    /// default gateway inside the namespace.
    pub fn peer(&self, endpoints: &EndpointPair) -> Address {
        match *self {
            Role::Server => endpoints.egress,
            Role::Client => endpoints.ingress,
        }
    }

    pub fn tun_name(&self) -> &'static str {
        match *self {
            Role::Server => "ingress",
            Role::Client => "tunnel",
        }
    }
}

/// Everything the namespace child needs, handed over by value when
/// it is forked.
pub struct Link {
    pub role: Role,
    pub endpoints: EndpointPair,
    pub socket: UdpSocket,
    pub ingress_log: PacketLog<BufWriter<File>>,
    pub egress_log: PacketLog<BufWriter<File>>,
    pub shell_prefix: String,
    pub command: Vec<String>,
}

/// Namespace setup: interface, loopback, default route.  Runs as root
/// inside the fresh namespace.
fn configure_namespace(role: Role, endpoints: &EndpointPair)
                       -> Result<TunDevice, HLError> {
    let local = role.local(endpoints);
    let peer = role.peer(endpoints);

    let tun = TunDevice::new(role.tun_name(), &local, &peer)?;
    bring_up_loopback()?;
    add_default_route(&peer)?;
    log::debug!("{} is up, default route via {}", tun.name(), peer.ip());
    Ok(tun)
}

/// Privilege drop, then the environment comes back, plus the variable
/// that lets a tunnel started from inside this one pick a different
/// subnet.
fn become_user(env: SavedEnvironment, endpoints: &EndpointPair)
               -> Result<(), HLError> {
    drop_privileges()?;
    env.restore()?;
    environment::set_default_var(BASE_VAR,
                                 &endpoints.egress.ip().to_string());
    Ok(())
}

/// Body of the namespace child.
fn run_link(link: Link, env: SavedEnvironment) -> Result<i32, HLError> {
    let Link { role, endpoints, socket, ingress_log, egress_log,
               shell_prefix, command } = link;

    env.check_cleared("namespace setup")?;
    let tun = configure_namespace(role, &endpoints)?;
    become_user(env, &endpoints)?;

    let mut engine = TunnelEngine::new(tun, socket, ingress_log, egress_log);
    let mut inner_loop = EventLoop::new()?;

    inner_loop.add_child_process(&describe(&command), || {
        prepend_shell_prefix(&shell_prefix);
        Err(ezexec(&command))
    }, false)?;

    engine.attach(&mut inner_loop);
    inner_loop.run()
}

/// The privileged outer process's view of the link: one child to wait
/// for.
pub struct Supervisor {
    event_loop: EventLoop<'static>,
}

impl Supervisor {
    /// Must be created before anything forks, so every process of the
    /// run sees the same signal handling.
    pub fn new() -> Result<Supervisor, HLError> {
        Ok(Supervisor { event_loop: EventLoop::new()? })
    }

    pub fn start_link(&mut self, link: Link, env: SavedEnvironment)
                      -> Result<(), HLError> {
        self.event_loop.add_child_process("packetshell",
                                          move || run_link(link, env),
                                          true)?;
        Ok(())
    }

    /// Wait for the namespace child, and return its exit code, which is
    /// the user command's.
    pub fn wait_for_exit(&mut self) -> Result<i32, HLError> {
        self.event_loop.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> EndpointPair {
        EndpointPair::derive(&Address::unspecified())
    }

    #[test]
    fn server_sits_on_ingress_and_routes_via_egress() {
        let p = pair();
        assert_eq!(Role::Server.local(&p), p.ingress);
        assert_eq!(Role::Server.peer(&p), p.egress);
        assert_eq!(Role::Server.tun_name(), "ingress");
    }

    #[test]
    fn client_is_the_mirror_image() {
        let p = pair();
        assert_eq!(Role::Client.local(&p), Role::Server.peer(&p));
        assert_eq!(Role::Client.peer(&p), Role::Server.local(&p));
        assert_eq!(Role::Client.tun_name(), "tunnel");
    }

    #[test]
    fn supervisor_passes_child_status_through() {
        let mut sup = Supervisor::new().unwrap();
        sup.event_loop.add_child_process("exit 7", || Ok(7), false).unwrap();
        assert_eq!(sup.wait_for_exit().unwrap(), 7);
    }

    #[test]
    fn exec_status_survives_both_loops() {
        let command = vec![String::from("sh"), String::from("-c"),
                           String::from("exit 7")];
        let mut sup = Supervisor::new().unwrap();
        sup.event_loop.add_child_process("packetshell", || {
            let mut inner_loop = EventLoop::new()?;
            inner_loop.add_child_process(&describe(&command), || {
                Err(ezexec(&command))
            }, false)?;
            inner_loop.run()
        }, false).unwrap();
        assert_eq!(sup.wait_for_exit().unwrap(), 7);
    }
}
