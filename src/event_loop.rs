//! The event loop is the only thing any of our processes does once
//! setup is over.  It watches a set of pollable sources, the child
//! processes it forked, and the termination signals, and dispatches
//! each readiness event to whoever asked for it.  Single-threaded: a
//! callback runs to completion before the loop polls again.

use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{kill, Signal, SigSet, SigmaskHow};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::err::*;

/// What a callback wants the loop to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(i32),
}

pub type Callback<'a> = Box<dyn FnMut() -> Result<Flow, HLError> + 'a>;

/// Return a signal set including all of the signals whose default
/// action is to terminate the process without a core dump.
fn sigset_normal_termination () -> SigSet {
    use nix::sys::signal::Signal::*;

    // It is easiest to define this signal set negatively.
    let mut ss = SigSet::all();

    // signals that cannot be caught
    ss.remove(SIGKILL);
    ss.remove(SIGSTOP);

    // signals that normally suspend or resume the process
    ss.remove(SIGTSTP);
    ss.remove(SIGTTIN);
    ss.remove(SIGTTOU);
    ss.remove(SIGCONT);

    // signals that are normally ignored; child exits are seen through
    // pidfds instead of SIGCHLD
    ss.remove(SIGCHLD);
    ss.remove(SIGURG);
    ss.remove(SIGWINCH);

    // signals indicating a fatal CPU exception or user abort
    ss.remove(SIGABRT);
    ss.remove(SIGBUS);
    ss.remove(SIGFPE);
    ss.remove(SIGILL);
    ss.remove(SIGQUIT);
    ss.remove(SIGSEGV);
    ss.remove(SIGSYS);
    ss.remove(SIGTRAP);

    ss
}

/// A file descriptor that becomes readable when process `pid` exits.
fn pidfd_open(pid: Pid) -> Result<OwnedFd, HLError> {
    let rv = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
    if rv < 0 {
        return Err(map_nix_err(Errno::last(),
                               format!("pidfd_open({})", pid)));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(rv as RawFd) })
}

/// Shell convention for the status of a child: its exit code, or 128
/// plus the number of the signal that killed it.
fn exit_code_of(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
        _ => None,
    }
}

/// Leave a forked child without running exit handlers or flushing
/// stdio buffers inherited from the parent.
fn child_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Internal: body of a freshly forked child.  Never returns.
fn run_child<F>(description: &str, mask: &SigSet, new_namespace: bool,
                procedure: F) -> !
    where F: FnOnce() -> Result<i32, HLError>
{
    let result = mask.thread_set_mask()
        .map_err(|e| map_nix_err(e, String::from("sigprocmask")))
        .and_then(|_| if new_namespace {
            unshare(CloneFlags::CLONE_NEWNET)
                .map_err(|e| map_nix_err(e, String::from("unshare")))
        } else {
            Ok(())
        })
        .and_then(|_| procedure());

    match result {
        Ok(code) => child_exit(code),
        Err(e) => {
            log::error!("{}: {}", description, e);
            child_exit(1)
        }
    }
}

struct Source<'a> {
    fd: BorrowedFd<'a>,
    callback: Callback<'a>,
}

struct ChildProcess {
    description: String,
    pid: Pid,
    pidfd: OwnedFd,
}

/// An "event" is anything the loop has to act on:
///  - a registered source is readable (or in error)
///  - a child process has exited
///  - the program received a signal that should end it
enum Event {
    Ready(usize),
    ChildExit(usize),
    TermSignal(Signal),
}

pub struct EventLoop<'a> {
    sources: Vec<Source<'a>>,
    children: Vec<ChildProcess>,
    signals: SignalFd,
    child_mask: SigSet,
}

impl<'a> EventLoop<'a> {
    /// Block the termination signals and start reading them through a
    /// signalfd.  The mask in effect beforehand is remembered and
    /// reinstated in every child this loop forks.
    pub fn new() -> Result<EventLoop<'a>, HLError> {
        let mask = sigset_normal_termination();
        let child_mask = mask.thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .map_err(|e| map_nix_err(e, String::from("sigprocmask")))?;
        let signals = SignalFd::with_flags(
            &mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(|e| map_nix_err(e, String::from("signalfd")))?;

        Ok(EventLoop {
            sources: Vec::new(),
            children: Vec::new(),
            signals,
            child_mask,
        })
    }

    /// Call `callback` every time `source` polls readable.
    pub fn register<S, F>(&mut self, source: &'a S, callback: F)
        where S: AsFd + ?Sized,
              F: FnMut() -> Result<Flow, HLError> + 'a
    {
        self.sources.push(Source {
            fd: source.as_fd(),
            callback: Box::new(callback),
        });
    }

    /// Fork, optionally move the child into a fresh network namespace,
    /// and run `procedure` there.  The child exits with the code the
    /// procedure returns (1 if it fails), and the loop ends as soon as
    /// it sees that exit.
    pub fn add_child_process<F>(&mut self, description: &str, procedure: F,
                                new_namespace: bool)
                                -> Result<Pid, HLError>
        where F: FnOnce() -> Result<i32, HLError>
    {
        let forked = unsafe { fork() }
            .map_err(|e| map_nix_err(e, format!("fork ({})", description)))?;

        match forked {
            ForkResult::Child => {
                run_child(description, &self.child_mask, new_namespace,
                          procedure)
            },
            ForkResult::Parent { child } => {
                let pidfd = match pidfd_open(child) {
                    Ok(fd) => fd,
                    Err(e) => {
                        let _ = kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        return Err(e);
                    }
                };
                log::debug!("started child process {} ({})",
                            child, description);
                self.children.push(ChildProcess {
                    description: String::from(description),
                    pid: child,
                    pidfd,
                });
                Ok(child)
            }
        }
    }

    /// Internal: wait for something to happen and report everything
    /// that did.
    fn poll_events(&mut self) -> Result<Vec<Event>, HLError> {
        let readable = PollFlags::POLLIN;
        let mut pfds: Vec<PollFd> = Vec::with_capacity(
            1 + self.sources.len() + self.children.len());

        pfds.push(PollFd::new(self.signals.as_fd(), readable));
        for s in &self.sources {
            pfds.push(PollFd::new(s.fd, readable));
        }
        for c in &self.children {
            pfds.push(PollFd::new(c.pidfd.as_fd(), readable));
        }

        loop {
            match poll(&mut pfds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(map_nix_err(e, String::from("poll"))),
            }
        }

        let mut ready = Vec::with_capacity(pfds.len());
        for (i, pfd) in pfds.iter().enumerate() {
            let revents = pfd.revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLNVAL) {
                return Err(map_nix_err(Errno::EBADF,
                                       format!("poll: entry {}", i)));
            }
            ready.push(!revents.is_empty());
        }
        drop(pfds);

        let mut events = Vec::new();
        if ready[0] {
            if let Some(sig) = self.next_signal()? {
                events.push(Event::TermSignal(sig));
            }
        }
        let nsrc = self.sources.len();
        for i in 0..nsrc {
            if ready[1 + i] {
                events.push(Event::Ready(i));
            }
        }
        for i in 0..self.children.len() {
            if ready[1 + nsrc + i] {
                events.push(Event::ChildExit(i));
            }
        }
        Ok(events)
    }

    /// Internal: read one pending termination signal, if any.
    fn next_signal(&mut self) -> Result<Option<Signal>, HLError> {
        let info = self.signals.read_signal()
            .map_err(|e| map_nix_err(e, String::from("read signalfd")))?;
        match info {
            Some(info) => {
                let sig = Signal::try_from(info.ssi_signo as i32)
                    .map_err(|e| map_nix_err(e, String::from("signalfd")))?;
                Ok(Some(sig))
            },
            None => Ok(None),
        }
    }

    /// Internal: reap child `i` if it has really exited.
    fn reap(&mut self, i: usize) -> Result<Option<i32>, HLError> {
        let pid = self.children[i].pid;
        let status = waitpid(pid, Some(WaitPidFlag::WNOHANG))
            .map_err(|e| map_nix_err(e, format!("waitpid({})", pid)))?;
        match exit_code_of(status) {
            Some(code) => {
                let child = self.children.remove(i);
                log::debug!("child process {} ({}) exited with status {}",
                            child.pid, child.description, code);
                Ok(Some(code))
            },
            None => Ok(None),
        }
    }

    /// Run until a callback says `Exit`, a child process exits, a
    /// callback fails, or a termination signal arrives.  The exit code
    /// of whichever ended the loop is returned.
    pub fn run(&mut self) -> Result<i32, HLError> {
        loop {
            if self.sources.is_empty() && self.children.is_empty() {
                return Ok(0);
            }
            for event in self.poll_events()? {
                match event {
                    Event::TermSignal(signal) => {
                        return Err(HLError::Signal { signal });
                    },
                    Event::Ready(i) => {
                        match (self.sources[i].callback)()? {
                            Flow::Continue => (),
                            Flow::Exit(code) => return Ok(code),
                        }
                    },
                    Event::ChildExit(i) => {
                        if let Some(code) = self.reap(i)? {
                            return Ok(code);
                        }
                    },
                }
            }
        }
    }
}

impl<'a> Drop for EventLoop<'a> {
    /// Children still running when their loop goes away are hung up on
    /// and reaped.
    fn drop(&mut self) {
        for child in self.children.drain(..) {
            let _ = kill(child.pid, Signal::SIGHUP);
            let _ = waitpid(child.pid, None);
        }
        let _ = self.child_mask.thread_set_mask();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;
    use std::time::Duration;
    use nix::unistd::getpid;

    #[test]
    fn child_exit_code_is_the_loop_result() {
        let mut el = EventLoop::new().unwrap();
        el.add_child_process("exit 7", || Ok(7), false).unwrap();
        assert_eq!(el.run().unwrap(), 7);
    }

    #[test]
    fn failed_procedure_exits_with_one() {
        let mut el = EventLoop::new().unwrap();
        el.add_child_process("fails", || Err(HLError::EnvReentered), false)
            .unwrap();
        assert_eq!(el.run().unwrap(), 1);
    }

    #[test]
    fn signal_death_maps_to_128_plus_signo() {
        let mut el = EventLoop::new().unwrap();
        el.add_child_process("killed", || {
            kill(getpid(), Signal::SIGKILL).unwrap();
            Ok(0)
        }, false).unwrap();
        assert_eq!(el.run().unwrap(), 128 + 9);
    }

    #[test]
    fn callback_exit_ends_the_loop() {
        let (a, b) = UnixDatagram::pair().unwrap();
        a.send(b"ping").unwrap();

        let mut seen = Vec::new();
        {
            let mut el = EventLoop::new().unwrap();
            el.register(&b, || {
                let mut buf = [0u8; 16];
                let n = b.recv(&mut buf).unwrap();
                seen.extend_from_slice(&buf[..n]);
                Ok(Flow::Exit(3))
            });
            assert_eq!(el.run().unwrap(), 3);
        }
        assert_eq!(seen, b"ping");
    }

    #[test]
    fn callback_failure_propagates() {
        let (a, b) = UnixDatagram::pair().unwrap();
        a.send(b"x").unwrap();

        let mut el = EventLoop::new().unwrap();
        el.register(&b, || Err(HLError::ShortFrame { len: 1 }));
        match el.run() {
            Err(HLError::ShortFrame { len: 1 }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn continue_keeps_dispatching_until_child_exits() {
        let (a, b) = UnixDatagram::pair().unwrap();
        for _ in 0..3 {
            a.send(b"p").unwrap();
        }

        let mut count = 0;
        {
            let mut el = EventLoop::new().unwrap();
            el.register(&b, || {
                let mut buf = [0u8; 4];
                b.recv(&mut buf).unwrap();
                count += 1;
                Ok(Flow::Continue)
            });
            el.add_child_process("late exit", || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(5)
            }, false).unwrap();
            assert_eq!(el.run().unwrap(), 5);
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_loop_returns_zero() {
        let mut el = EventLoop::new().unwrap();
        assert_eq!(el.run().unwrap(), 0);
    }

    #[test]
    fn dropping_the_loop_hangs_up_on_children() {
        let pid;
        {
            let mut el = EventLoop::new().unwrap();
            pid = el.add_child_process("sleeper", || {
                std::thread::sleep(Duration::from_secs(30));
                Ok(0)
            }, false).unwrap();
        }
        assert_eq!(kill(pid, None), Err(Errno::ESRCH));
    }
}
