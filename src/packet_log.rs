//! Per-direction audit trail of forwarded packets.
//!
//! Each record is one line, `<ms since start> - <sequence id> - <length>`.
//! A direction with no log file configured costs nothing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::err::*;
use crate::privileges::TemporarilyUnprivileged;

/// Time base shared by both logs.  Captured once, before any fork, so
/// every process of one run counts from the same instant.
#[derive(Clone, Copy, Debug)]
pub struct LogClock {
    start: Instant,
}

impl LogClock {
    pub fn start() -> LogClock {
        LogClock { start: Instant::now() }
    }

    /// Whole milliseconds since `start()`.
    pub fn timestamp(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

pub struct PacketLog<W: Write = BufWriter<File>> {
    sink: Option<W>,
    clock: LogClock,
}

impl PacketLog<BufWriter<File>> {
    /// Open (truncating) `path` if one was given.  No path, no file.
    pub fn open(path: Option<&Path>, clock: LogClock)
                -> Result<PacketLog<BufWriter<File>>, HLError> {
        let sink = match path {
            None => None,
            Some(p) => {
                let f = File::create(p).map_err(|e| map_io_err(
                    e, format!("{}: error opening for writing", p.display())))?;
                Some(BufWriter::new(f))
            }
        };
        Ok(PacketLog { sink, clock })
    }
}

/// Open the ingress and egress logs with the real user's effective
/// ids, so a setuid-root process cannot be talked into creating or
/// truncating files the user could not write to.  The descriptors stay
/// usable once root is regained.
pub fn open_as_user(ingress: Option<&Path>, egress: Option<&Path>,
                    clock: LogClock)
                    -> Result<(PacketLog, PacketLog), HLError> {
    let _unprivileged = TemporarilyUnprivileged::new()?;
    let ingress_log = PacketLog::open(ingress, clock)?;
    let egress_log = PacketLog::open(egress, clock)?;
    Ok((ingress_log, egress_log))
}

impl<W: Write> PacketLog<W> {
    pub fn with_sink(sink: Option<W>, clock: LogClock) -> PacketLog<W> {
        PacketLog { sink, clock }
    }

    pub fn disabled(clock: LogClock) -> PacketLog<W> {
        PacketLog { sink: None, clock }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn record(&mut self, id: u64, len: usize) -> Result<(), HLError> {
        if let Some(ref mut out) = self.sink {
            writeln!(out, "{} - {} - {}", self.clock.timestamp(), id, len)
                .map_err(|e| map_io_err(e, String::from("packet log")))?;
        }
        Ok(())
    }

    /// Give back the underlying writer, if any.
    pub fn into_inner(self) -> Option<W> {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(line: &str) -> (u64, u64, usize) {
        let fields: Vec<&str> = line.split(" - ").collect();
        assert_eq!(fields.len(), 3, "bad record {:?}", line);
        (fields[0].parse().unwrap(),
         fields[1].parse().unwrap(),
         fields[2].parse().unwrap())
    }

    #[test]
    fn records_one_line_per_packet() {
        let mut log = PacketLog::with_sink(Some(Vec::new()), LogClock::start());
        log.record(0, 40).unwrap();
        log.record(1, 60).unwrap();
        let text = String::from_utf8(log.into_inner().unwrap()).unwrap();
        let recs: Vec<_> = text.lines().map(parse).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!((recs[0].1, recs[0].2), (0, 40));
        assert_eq!((recs[1].1, recs[1].2), (1, 60));
        assert!(recs[0].0 <= recs[1].0);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let mut log: PacketLog<Vec<u8>> = PacketLog::disabled(LogClock::start());
        assert!(!log.is_enabled());
        log.record(0, 100).unwrap();
        assert!(log.into_inner().is_none());
    }

    #[test]
    fn open_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("egress.log");
        fs::write(&path, "stale\nstale\n").unwrap();

        let mut log = PacketLog::open(Some(&path), LogClock::start()).unwrap();
        log.record(0, 84).unwrap();
        drop(log);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with(" - 0 - 84\n"));
    }

    #[test]
    fn open_without_path_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::open(None, LogClock::start()).unwrap();
        assert!(!log.is_enabled());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn open_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("ingress.log");
        let err = PacketLog::open(Some(&path), LogClock::start())
            .err().unwrap();
        assert!(err.to_string().contains("error opening for writing"));
    }

    #[test]
    fn open_as_user_opens_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingress.log");
        let (ingress, egress) =
            open_as_user(Some(&path), None, LogClock::start()).unwrap();
        assert!(ingress.is_enabled());
        assert!(!egress.is_enabled());
        assert!(path.exists());
    }

    #[test]
    #[ignore = "needs root to impersonate a setuid-root invocation"]
    fn open_as_user_cannot_truncate_root_files() {
        use nix::unistd::{setresgid, setresuid, Gid, Uid};
        use crate::event_loop::EventLoop;

        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("victim");
        fs::write(&victim, "precious\n").unwrap();

        let mut el = EventLoop::new().unwrap();
        el.add_child_process("setuid-like open", || {
            let nobody = 65534;
            setresgid(Gid::from_raw(nobody), Gid::from_raw(0), Gid::from_raw(0))
                .map_err(|e| map_nix_err(e, String::from("setresgid")))?;
            setresuid(Uid::from_raw(nobody), Uid::from_raw(0), Uid::from_raw(0))
                .map_err(|e| map_nix_err(e, String::from("setresuid")))?;

            let refused = open_as_user(None, Some(&victim), LogClock::start())
                .is_err();
            let intact = fs::read_to_string(&victim)
                .map(|t| t == "precious\n").unwrap_or(false);
            Ok(if refused && intact { 0 } else { 2 })
        }, false).unwrap();
        assert_eq!(el.run().unwrap(), 0);
    }
}
