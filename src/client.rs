//! Client role: already knows where the server is and which addresses
//! to use, so it goes straight to the rendezvous.

use std::path::Path;

use crate::address::{Address, EndpointPair};
use crate::environment::SavedEnvironment;
use crate::err::*;
use crate::link::{Link, Role, Supervisor};
use crate::packet_log::{self, LogClock, PacketLog};
use crate::rendezvous::ConnectedSocket;

pub fn shell_prefix(server: &Address) -> String {
    format!("[tunnelclient {}] ", server)
}

pub struct TunnelClient {
    env: SavedEnvironment,
    server: Address,
    endpoints: EndpointPair,
    socket: ConnectedSocket,
    ingress_log: PacketLog,
    egress_log: PacketLog,
    supervisor: Supervisor,
}

impl TunnelClient {
    /// `local_private` and `server_private` are the egress and ingress
    /// addresses from the server's announcement.
    pub fn new(env: SavedEnvironment,
               server: Address,
               local_private: Address,
               server_private: Address,
               ingress_logfile: Option<&Path>,
               egress_logfile: Option<&Path>)
               -> Result<TunnelClient, HLError> {
        env.check_cleared("TunnelClient")?;
        let supervisor = Supervisor::new()?;

        let clock = LogClock::start();
        let (ingress_log, egress_log) =
            packet_log::open_as_user(ingress_logfile, egress_logfile, clock)?;

        let socket = ConnectedSocket::to_server(&server)?;

        Ok(TunnelClient {
            env,
            server,
            endpoints: EndpointPair::given(local_private, server_private),
            socket,
            ingress_log,
            egress_log,
            supervisor,
        })
    }

    pub fn start_link(self, command: Vec<String>)
                      -> Result<Supervisor, HLError> {
        let TunnelClient { env, server, endpoints, socket, ingress_log,
                           egress_log, mut supervisor } = self;
        let link = Link {
            role: Role::Client,
            endpoints,
            socket: socket.into_socket(),
            ingress_log,
            egress_log,
            shell_prefix: shell_prefix(&server),
            command,
        };
        supervisor.start_link(link, env)?;
        Ok(supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_server() {
        let server = Address::resolve("127.0.0.1", 41000).unwrap();
        assert_eq!(shell_prefix(&server), "[tunnelclient 127.0.0.1:41000] ");
    }
}
