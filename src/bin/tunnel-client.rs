/* Connect to a running tunnel-server and give a command a network
 * namespace whose only way out is the UDP tunnel to it.
 *
 * Copyright © 2015 Zack Weinberg
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 * http://www.apache.org/licenses/LICENSE-2.0
 * There is NO WARRANTY.
 *
 *     tunnel-client [--ingress-log FILE] [--egress-log FILE] \
 *         HOST PORT LOCAL-PRIVATE-IP SERVER-PRIVATE-IP [COMMAND...]
 *
 * The four positional arguments are exactly what 'tunnel-server'
 * prints on stdout.  A single datagram is sent to HOST:PORT to
 * announce ourselves; from then on only datagrams from HOST:PORT are
 * accepted.
 *
 * COMMAND (default: the user's login shell) is run, with the invoking
 * user's privileges and environment, in a new network namespace.  In
 * there, a TUN device named 'tunnel' holds LOCAL-PRIVATE-IP and is the
 * default route, via SERVER-PRIVATE-IP.  --ingress-log and
 * --egress-log work as for the server.
 *
 * The exit status is COMMAND's.
 *
 * This program must be installed setuid root, and refuses to run if
 * invoked by root.
 */

use std::process;

use std::path::PathBuf;

use clap::Parser;

use udp_netns_tunnel::*;
use udp_netns_tunnel::address::Address;
use udp_netns_tunnel::client::TunnelClient;
use udp_netns_tunnel::environment::SavedEnvironment;
use udp_netns_tunnel::privileges::check_requirements;
use udp_netns_tunnel::subprocess::shell_path;

#[derive(Parser, Debug)]
#[command(name = "tunnel-client",
          about = "Run a command in a network namespace tunneled to a \
                   tunnel-server")]
struct Args {
    /// More diagnostics on stderr (repeat for even more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log each packet received from the server to this file.
    #[arg(long, value_name = "FILENAME")]
    ingress_log: Option<PathBuf>,

    /// Log each packet sent to the server to this file.
    #[arg(long, value_name = "FILENAME")]
    egress_log: Option<PathBuf>,

    /// Host the server is running on.
    host: String,

    /// UDP port the server announced.
    port: u16,

    /// Address for our end of the tunnel.
    local_private_ip: String,

    /// Address for the server's end of the tunnel.
    server_private_ip: String,

    /// Command to run inside the namespace.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn run(env: SavedEnvironment, args: Args) -> Result<i32, HLError> {
    check_requirements("tunnel-client")?;

    let server = Address::resolve(&args.host, args.port)?;
    let local_private = Address::parse_ip(&args.local_private_ip)?;
    let server_private = Address::parse_ip(&args.server_private_ip)?;

    let client = TunnelClient::new(env, server,
                                   local_private, server_private,
                                   args.ingress_log.as_deref(),
                                   args.egress_log.as_deref())?;

    let command = if args.command.is_empty() {
        vec![shell_path()]
    } else {
        args.command
    };

    let mut supervisor = client.start_link(command)?;
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
