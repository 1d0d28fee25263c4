//! Shared code between the two ends of the tunnel.
//! The server and client programs are thin wrappers around this.

#![cfg(target_os = "linux")]

mod err;
pub use err::*;

pub mod address;
pub mod environment;
pub mod privileges;
pub mod event_loop;
pub mod tun;
pub mod frame;
pub mod packet_log;
pub mod tunnel;
pub mod rendezvous;
pub mod subprocess;
pub mod link;
pub mod server;
pub mod client;

/// Set up diagnostics on stderr.  Configured only from the command
/// line: `RUST_LOG` would be read from the untrusted environment.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Stderr)
        .init();
}
