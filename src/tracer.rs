//! Types for spawning and attaching to tracees, and driving their stop/resume cycle.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal,
        wait::{self, WaitPidFlag, WaitStatus},
    },
};
use tracing::{debug, info, trace};

use crate::cmd::Command;
use crate::error::{Error, Result, ResultExt};

pub use nix::unistd::Pid;
pub use nix::sys::ptrace::Options;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Lifecycle state of a [`Tracee`].
///
/// ```text
/// Created --> Attached --> Stopped <--> Running --> Exited
///    |           |
///    +-----------+--> Failed
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Process exists, but has not yet requested to be traced.
    Created,

    /// Traced, but not yet seen to stop. For a spawned tracee, it has not yet
    /// completed its exec.
    Attached,

    /// In a ptrace-stop. Registers and memory are quiescent and may be read.
    Stopped,

    /// Resumed. Nothing about the tracee may be inspected until the next stop.
    Running,

    /// Terminated after having been traced.
    Exited,

    /// A spawned tracee terminated before its exec stop, e.g. because the exec
    /// failed.
    Failed,
}

impl State {
    /// No further tracer operations are valid in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Exited | State::Failed)
    }
}

/// An event observed by [`Tracer::wait()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stop {
    /// `SIGTRAP` delivered to a spawned tracee on return from a successful exec.
    Exec,

    /// `SIGSTOP` delivered to a tracee by [`Tracer::attach()`].
    Attach,

    // signal-delivery-stop
    Signal { signal: Signal },

    // ptrace-event-stop, only seen if enabled via tracer options
    Event { signal: Signal, event: i32 },

    // terminal
    Exited { exit_code: i32 },
    Signaled {
        signal: Signal,
        core_dumped: bool,
    },
}

impl Stop {
    /// True if the event leaves the tracee in a ptrace-stop.
    pub fn is_stopped(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stop::Exited { .. } | Stop::Signaled { .. })
    }

    /// True for a normal termination with exit code 0.
    pub fn success(&self) -> bool {
        matches!(self, Stop::Exited { exit_code: 0 })
    }
}

/// A traced process, exclusively owned by the caller of the [`Tracer`] that
/// created it.
///
/// Tracing authority belongs to the thread that spawned or attached the tracee,
/// so this handle is neither `Send` nor `Clone`.
#[derive(Debug, Eq, PartialEq)]
pub struct Tracee {
    pid: Pid,
    state: State,

    // First stop still expected: `Exec` for a spawned tracee, `Attach` for an
    // attached one.
    awaiting: Option<Stop>,

    last_stop: Option<Stop>,

    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Tracee {
    fn new(pid: Pid, awaiting: Stop) -> Self {
        Self {
            pid,
            state: State::Created,
            awaiting: Some(awaiting),
            last_stop: None,
            _not_send: PhantomData,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Most recent event returned by [`Tracer::wait()`] for this tracee.
    pub fn last_stop(&self) -> Option<Stop> {
        self.last_stop
    }

    pub fn is_stopped(&self) -> bool {
        self.state == State::Stopped
    }

    /// Reject `op` unless the tracee is in a ptrace-stop.
    pub(crate) fn ensure_stopped(&self, op: &'static str) -> Result<()> {
        self.ensure_state(op, &[State::Stopped])
    }

    fn ensure_state(&self, op: &'static str, allowed: &[State]) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::NoSuchProcess { pid: self.pid });
        }

        if !allowed.contains(&self.state) {
            return Err(Error::InvalidState { pid: self.pid, state: self.state, op });
        }

        Ok(())
    }

    fn set_state(&mut self, state: State) {
        debug!(pid = self.pid.as_raw(), from = ?self.state, to = ?state, "setting tracee state");
        self.state = state;
    }
}

/// Tracer for Linux processes.
///
/// Each tracee is driven through a strict cycle: [`wait()`](Tracer::wait) until
/// it stops, inspect it, then [`resume()`](Tracer::resume) it. Only one tracer
/// may hold a given tracee.
///
/// Dropping the tracer does not detach or kill its tracees. Ptrace options take
/// effect at a tracee's first stop: its exec stop if spawned, its attach stop if
/// attached. From then on, with the default options, the kernel kills the
/// tracee when the tracing thread exits (`PTRACE_O_EXITKILL`). A tracee not yet
/// seen to stop has no options set, and survives its tracer.
#[derive(Debug, Eq, PartialEq)]
pub struct Tracer {
    /// Ptrace options applied to each tracee at its first stop.
    options: Options,

    /// PIDs this tracer holds tracing authority over.
    tracees: BTreeSet<i32>,
}

const DEFAULT_OPTIONS: Options = Options::PTRACE_O_EXITKILL;

/// Options that would auto-attach descendants of a tracee. Tracing process
/// trees is not supported, so these are never set.
pub const EXCLUDED_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACECLONE);

impl Tracer {
    pub fn new() -> Self {
        let options = DEFAULT_OPTIONS;
        let tracees = BTreeSet::new();

        Self { options, tracees }
    }

    /// Return the ptrace options applied to new tracees.
    pub fn traceme_options(&self) -> Options {
        self.options
    }

    /// Set the ptrace options applied to new tracees at their first stop.
    ///
    /// **NOTE:** [`EXCLUDED_OPTIONS`] are always cleared, even if set in the passed value.
    pub fn set_traceme_options(&mut self, options: Options) {
        self.options = options.difference(EXCLUDED_OPTIONS);
    }

    /// True if this tracer holds tracing authority over `pid`.
    pub fn is_tracing(&self, pid: Pid) -> bool {
        self.tracees.contains(&pid.as_raw())
    }

    /// Fork and exec `cmd` as a new tracee.
    ///
    /// The child requests `PTRACE_TRACEME` before exec, so its first stop is the
    /// exec trap. If the exec fails, the child exits instead: [`wait()`](Tracer::wait)
    /// reports the exit, and the tracee ends up [`State::Failed`].
    pub fn spawn(&mut self, cmd: &Command) -> Result<Tracee> {
        let pid = cmd.fork_exec()?;

        let mut tracee = Tracee::new(pid, Stop::Exec);
        info!(pid = pid.as_raw(), program = ?cmd.program(), "spawned tracee");

        // The child requests `TRACEME` before it can exec, so it is traced from
        // our point of view as soon as it exists.
        tracee.set_state(State::Attached);
        self.tracees.insert(pid.as_raw());

        Ok(tracee)
    }

    /// Attach to a running process. This will deliver a `SIGSTOP`.
    ///
    /// **Warning:** the tracee is not stopped until it has been seen to stop via
    /// [`wait()`](Tracer::wait).
    pub fn attach(&mut self, pid: Pid) -> Result<Tracee> {
        if self.is_tracing(pid) {
            return Err(Error::AlreadyTraced { pid });
        }

        ptrace::attach(pid).map_err(|source| Error::Attach { pid, source })?;

        let mut tracee = Tracee::new(pid, Stop::Attach);
        info!(pid = pid.as_raw(), "attached to tracee");

        tracee.set_state(State::Attached);
        self.tracees.insert(pid.as_raw());

        Ok(tracee)
    }

    /// Block until `tracee` stops or terminates.
    ///
    /// There is no timeout. If the tracee never stops, this never returns.
    ///
    /// When this returns a non-terminal [`Stop`], the tracee is [`State::Stopped`]
    /// and its registers and memory are quiescent until the next [`resume()`](Tracer::resume).
    pub fn wait(&mut self, tracee: &mut Tracee) -> Result<Stop> {
        self.ensure_owned(tracee)?;
        tracee.ensure_state("wait on", &[State::Attached, State::Running])?;

        let pid = tracee.pid;

        let status = loop {
            match wait::waitpid(pid, Some(WaitPidFlag::__WALL)) {
                Ok(status) => break status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    // Reaped behind our back.
                    debug!(pid = pid.as_raw(), "ECHILD for tracee, assuming reaped");
                    self.release(tracee, State::Exited);
                    return Err(Error::NoSuchProcess { pid });
                },
                Err(err) => return Err(err.into()),
            }
        };

        trace!(?status, "tracee changed state");

        let stop = match status {
            WaitStatus::Exited(_pid, exit_code) => {
                Stop::Exited { exit_code }
            },
            WaitStatus::Signaled(_pid, signal, core_dumped) => {
                Stop::Signaled { signal, core_dumped }
            },
            WaitStatus::Stopped(_pid, signal) => {
                match (tracee.awaiting, signal) {
                    (Some(Stop::Exec), Signal::SIGTRAP) => {
                        // Without `PTRACE_O_TRACEEXEC`, a successful exec by a tracee
                        // that requested `TRACEME` is reported as a plain `SIGTRAP`.
                        self.set_options(pid)?;

                        tracee.awaiting = None;
                        Stop::Exec
                    },
                    (Some(Stop::Attach), Signal::SIGSTOP) => {
                        self.set_options(pid)?;

                        tracee.awaiting = None;
                        Stop::Attach
                    },
                    _ => {
                        Stop::Signal { signal }
                    },
                }
            },
            WaitStatus::PtraceEvent(_pid, signal, event) => {
                Stop::Event { signal, event }
            },
            WaitStatus::PtraceSyscall(_pid) => {
                // We never restart with `PTRACE_SYSCALL`.
                internal_error!("unexpected syscall-stop")
            },
            // Assume `!WNOHANG`, `!WCONTINUED`.
            WaitStatus::Continued(_) |
            WaitStatus::StillAlive => {
                internal_error!("unreachable `wait()` status")
            },
        };

        tracee.last_stop = Some(stop);

        if stop.is_terminal() {
            // Terminating before the exec stop means the tracee never ran its
            // new image.
            let state = if tracee.awaiting == Some(Stop::Exec) {
                State::Failed
            } else {
                State::Exited
            };

            self.release(tracee, state);
        } else {
            tracee.set_state(State::Stopped);
        }

        Ok(stop)
    }

    /// Wait for a spawned tracee's exec stop.
    ///
    /// Returns [`Error::Exec`] if the tracee terminated instead, which means its
    /// program image could not be executed. Signal-stops seen before the exec are
    /// resumed without delivering the signal.
    pub fn wait_for_exec(&mut self, tracee: &mut Tracee) -> Result<()> {
        if tracee.awaiting != Some(Stop::Exec) {
            return Err(Error::InvalidState { pid: tracee.pid, state: tracee.state, op: "wait for exec of" });
        }

        loop {
            match self.wait(tracee)? {
                Stop::Exec => return Ok(()),
                stop @ (Stop::Exited { .. } | Stop::Signaled { .. }) => {
                    return Err(Error::Exec { pid: tracee.pid, stop });
                },
                stop => {
                    debug!(pid = tracee.pid.as_raw(), ?stop, "skipping pre-exec stop");
                    self.resume(tracee)?;
                },
            }
        }
    }

    /// Resume a stopped tracee. No signal is delivered.
    ///
    /// On failure the tracee stays [`State::Stopped`].
    pub fn resume(&mut self, tracee: &mut Tracee) -> Result<()> {
        self.ensure_owned(tracee)?;
        tracee.ensure_stopped("resume")?;

        let pid = tracee.pid;
        ptrace::cont(pid, None).map_err(|source| Error::Resume { pid, source })?;

        tracee.set_state(State::Running);

        Ok(())
    }

    /// Kill the tracee with `SIGKILL` and reap it, returning its termination.
    ///
    /// Valid in any non-terminal state. Any stops still queued are discarded.
    pub fn kill(&mut self, tracee: &mut Tracee) -> Result<Stop> {
        self.ensure_owned(tracee)?;
        tracee.ensure_state("kill", &[State::Attached, State::Stopped, State::Running])?;

        let pid = tracee.pid;
        signal::kill(pid, Signal::SIGKILL).died_if_esrch(pid)?;

        // `wait()` only accepts a tracee that can still change state.
        if tracee.state == State::Stopped {
            tracee.set_state(State::Running);
        }

        loop {
            let stop = self.wait(tracee)?;

            if stop.is_terminal() {
                info!(pid = pid.as_raw(), ?stop, "killed tracee");
                return Ok(stop);
            }

            debug!(pid = pid.as_raw(), ?stop, "discarding stop of killed tracee");
            tracee.set_state(State::Running);
        }
    }

    // Only valid while `pid` is in a ptrace-stop.
    fn set_options(&self, pid: Pid) -> Result<()> {
        if self.options.is_empty() {
            return Ok(());
        }

        debug!(pid = pid.as_raw(), options = ?self.options, "setting ptrace options");
        ptrace::setoptions(pid, self.options).died_if_esrch(pid)
    }

    fn ensure_owned(&self, tracee: &Tracee) -> Result<()> {
        if tracee.state.is_terminal() {
            return Err(Error::NoSuchProcess { pid: tracee.pid });
        }

        if !self.is_tracing(tracee.pid) {
            return Err(Error::NotOwned { pid: tracee.pid });
        }

        Ok(())
    }

    // Give up authority over a terminated tracee.
    fn release(&mut self, tracee: &mut Tracee, state: State) {
        info!(pid = tracee.pid.as_raw(), ?state, "removing tracee");

        tracee.set_state(state);
        self.tracees.remove(&tracee.pid.as_raw());
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracee(state: State) -> Tracee {
        let mut tracee = Tracee::new(Pid::from_raw(1 << 22), Stop::Exec);
        tracee.state = state;
        tracee
    }

    #[test]
    fn test_terminal_states() {
        assert!(State::Exited.is_terminal());
        assert!(State::Failed.is_terminal());
        assert!(!State::Stopped.is_terminal());
        assert!(!State::Attached.is_terminal());
    }

    #[test]
    fn test_ensure_stopped() {
        assert!(tracee(State::Stopped).ensure_stopped("inspect").is_ok());

        for state in [State::Created, State::Attached, State::Running] {
            let err = tracee(state).ensure_stopped("inspect").unwrap_err();
            assert!(matches!(err, Error::InvalidState { state: s, op: "inspect", .. } if s == state));
        }

        for state in [State::Exited, State::Failed] {
            let err = tracee(state).ensure_stopped("inspect").unwrap_err();
            assert!(matches!(err, Error::NoSuchProcess { .. }));
        }
    }

    #[test]
    fn test_unowned_tracee_rejected() {
        let mut tracer = Tracer::new();
        let mut tracee = tracee(State::Stopped);

        let err = tracer.resume(&mut tracee).unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));
        assert_eq!(tracee.state(), State::Stopped);

        let err = tracer.wait(&mut tracee).unwrap_err();
        assert!(matches!(err, Error::NotOwned { .. }));
    }

    #[test]
    fn test_excluded_options_cleared() {
        let mut tracer = Tracer::new();
        assert_eq!(tracer.traceme_options(), Options::PTRACE_O_EXITKILL);

        tracer.set_traceme_options(Options::PTRACE_O_TRACEFORK | Options::PTRACE_O_TRACESYSGOOD);
        assert_eq!(tracer.traceme_options(), Options::PTRACE_O_TRACESYSGOOD);
    }

    #[test]
    fn test_stop_predicates() {
        assert!(Stop::Exec.is_stopped());
        assert!(Stop::Exited { exit_code: 0 }.success());
        assert!(!Stop::Exited { exit_code: 1 }.success());

        let killed = Stop::Signaled { signal: Signal::SIGKILL, core_dumped: false };
        assert!(killed.is_terminal());
        assert!(!killed.success());
    }
}
