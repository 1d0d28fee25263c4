//! Server role: picks the subnet, announces itself, and waits for the
//! client to turn up.

use std::io;

use std::path::Path;

use crate::address::{Address, EndpointPair};
use crate::environment::{SavedEnvironment, BASE_VAR};
use crate::err::*;
use crate::link::{Link, Role, Supervisor};
use crate::packet_log::{self, LogClock, PacketLog};
use crate::privileges::TemporarilyUnprivileged;
use crate::rendezvous::{ConnectedSocket, ListeningSocket};

pub const SHELL_PREFIX: &str = "[tunnelserver] ";

/// Egress address of the tunnel we are running inside, if any.
///
/// This is the one place where privileged code looks at the user's
/// environment, so it does so with the user's effective ids and only
/// for the duration of the lookup.
pub fn discover_base(env: &SavedEnvironment) -> Result<Address, HLError> {
    let _unprivileged = TemporarilyUnprivileged::new()?;
    let scope = env.reinstate_for_lookup()?;
    match scope.var(BASE_VAR) {
        None => Ok(Address::unspecified()),
        Some(value) => {
            let base = Address::parse_ip(&value)?;
            if !base.is_unspecified() && !EndpointPair::in_pool(&base) {
                return Err(map_addr_err(
                    io::Error::new(io::ErrorKind::InvalidInput,
                                   "not in 100.64.0.0/10"),
                    format!("{}={}", BASE_VAR, value)));
            }
            Ok(base)
        },
    }
}

pub struct TunnelServer {
    env: SavedEnvironment,
    endpoints: EndpointPair,
    socket: ConnectedSocket,
    ingress_log: PacketLog,
    egress_log: PacketLog,
    supervisor: Supervisor,
}

impl TunnelServer {
    /// Bind, announce on stdout, and block until the client's first
    /// datagram arrives.
    pub fn new(env: SavedEnvironment,
               ingress_logfile: Option<&Path>,
               egress_logfile: Option<&Path>)
               -> Result<TunnelServer, HLError> {
        env.check_cleared("TunnelServer")?;
        let supervisor = Supervisor::new()?;

        let clock = LogClock::start();
        let (ingress_log, egress_log) =
            packet_log::open_as_user(ingress_logfile, egress_logfile, clock)?;

        let endpoints = EndpointPair::derive(&discover_base(&env)?);

        let listening = ListeningSocket::bind()?;
        listening.announce(&mut io::stdout().lock(), &endpoints)?;
        let socket = listening.await_peer()?;

        Ok(TunnelServer {
            env, endpoints, socket, ingress_log, egress_log, supervisor,
        })
    }

    /// Fork the namespace child that runs `command`.  Returns the
    /// supervisor to wait on.
    pub fn start_link(self, command: Vec<String>)
                      -> Result<Supervisor, HLError> {
        let TunnelServer { env, endpoints, socket, ingress_log, egress_log,
                           mut supervisor } = self;
        let link = Link {
            role: Role::Server,
            endpoints,
            socket: socket.into_socket(),
            ingress_log,
            egress_log,
            shell_prefix: String::from(SHELL_PREFIX),
            command,
        };
        supervisor.start_link(link, env)?;
        Ok(supervisor)
    }
}
