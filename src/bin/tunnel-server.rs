/* Run a command in a private network namespace whose only way out is
 * a UDP tunnel to a peer.
 *
 * Copyright © 2015 Zack Weinberg
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * http://www.apache.org/licenses/LICENSE-2.0
 * There is NO WARRANTY.
 *
 *     tunnel-server [--ingress-log FILE] [--egress-log FILE] [COMMAND...]
 *
 * binds a UDP socket to an ephemeral port and writes one line to
 * stdout:
 *
 *   tunnel-client localhost PORT EGRESS-IP INGRESS-IP
 *
 * which is the start of the command line for the other end (see
 * 'tunnel-client').  It then waits, indefinitely, for the first
 * datagram to arrive; its sender becomes the peer, and nothing from
 * anywhere else is accepted afterward.
 *
 * COMMAND (default: the user's login shell) is then run, with the
 * invoking user's privileges and environment, in a new network
 * namespace.  In there, a TUN device named 'ingress' holds INGRESS-IP
 * and is the default route, via EGRESS-IP.  Every packet the namespace
 * sends is forwarded to the peer and every datagram from the peer is
 * injected back.  With --ingress-log / --egress-log, one line per
 * packet received from / sent to the peer is written to FILE.
 *
 * The exit status is COMMAND's.
 *
 * If NETNS_TUNNEL_BASE is set in the environment (it is set inside
 * every tunnel, to that tunnel's egress address), the next subnet
 * along is used, so tunnels can be nested.
 *
 * This program must be installed setuid root, and refuses to run if
 * invoked by root.
 *
 * This program makes extensive use of Linux-specific network stack
 * features: network namespaces, TUN devices, pidfds and signalfd.
 */

use std::process;

use std::path::PathBuf;

use clap::Parser;

use udp_netns_tunnel::*;
use udp_netns_tunnel::environment::SavedEnvironment;
use udp_netns_tunnel::privileges::check_requirements;
use udp_netns_tunnel::server::TunnelServer;
use udp_netns_tunnel::subprocess::shell_path;

#[derive(Parser, Debug)]
#[command(name = "tunnel-server",
          about = "Run a command in a network namespace tunneled over UDP")]
struct Args {
    /// More diagnostics on stderr (repeat for even more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log each packet received from the peer to this file.
    #[arg(long, value_name = "FILENAME")]
    ingress_log: Option<PathBuf>,

    /// Log each packet sent to the peer to this file.
    #[arg(long, value_name = "FILENAME")]
    egress_log: Option<PathBuf>,

    /// Command to run inside the namespace.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn run(env: SavedEnvironment, args: Args) -> Result<i32, HLError> {
    check_requirements("tunnel-server")?;

    let server = TunnelServer::new(env,
                                   args.ingress_log.as_deref(),
                                   args.egress_log.as_deref())?;

    let command = if args.command.is_empty() {
        vec![shell_path()]
    } else {
        args.command
    };

    let mut supervisor = server.start_link(command)?;
    supervisor.wait_for_exit()
}

fn main() {
    // Clear the environment while running as root, before anything
    // can look at it.
    let env = SavedEnvironment::capture();

    let args = Args::parse();
    init_logging(args.verbose);

    process::exit(exit_code(env.and_then(|env| run(env, args))));
}
