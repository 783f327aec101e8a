use std::ffi::NulError;
use std::io;

use nix::errno::Errno;

use crate::tracer::{Pid, State, Stop};


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not create tracee process")]
    Spawn { source: nix::Error },

    #[error("Tracee = {pid} terminated before completing exec: {stop:?}")]
    Exec { pid: Pid, stop: Stop },

    #[error("No such tracee = {pid}")]
    NoSuchProcess { pid: Pid },

    #[error("Could not attach to tracee = {pid}")]
    Attach {
        pid: Pid,
        source: nix::Error,
    },

    #[error("Tracee = {pid} is already traced by this tracer")]
    AlreadyTraced { pid: Pid },

    #[error("Tracee = {pid} is not traced by this tracer")]
    NotOwned { pid: Pid },

    #[error("Cannot {op} tracee = {pid} in state = {state:?}")]
    InvalidState {
        pid: Pid,
        state: State,
        op: &'static str,
    },

    #[error("Could not resume tracee = {pid}")]
    Resume { pid: Pid, source: nix::Error },

    #[error("Could not read memory of tracee = {pid} at address = 0x{addr:x}")]
    MemoryRead { pid: Pid, addr: u64, source: nix::Error },

    #[error("Could not read register file of tracee = {pid} at offset = {offset}")]
    RegisterRead { pid: Pid, offset: u64, source: nix::Error },

    #[error("Unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("Argument contains an interior NUL byte")]
    Nul(#[from] NulError),

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True if the error was caused by the tracee no longer existing.
    pub fn tracee_died(&self) -> bool {
        match self {
            Error::NoSuchProcess { .. } => true,
            Error::Resume { source, .. } |
            Error::MemoryRead { source, .. } |
            Error::RegisterRead { source, .. } => *source == Errno::ESRCH,
            _ => false,
        }
    }

    /// True if the error ends the tracing session.
    ///
    /// Anything else leaves the tracee state machine intact, so the caller may
    /// retry after the next stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Spawn { .. } | Error::Internal(..))
    }
}

pub(crate) trait ResultExt<T> {
    /// Interpret `ESRCH` as the tracee having vanished.
    fn died_if_esrch(self, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, nix::Error> {
    fn died_if_esrch(self, pid: Pid) -> Result<T> {
        match self {
            Ok(t) => Ok(t),
            Err(Errno::ESRCH) => Err(Error::NoSuchProcess { pid }),
            Err(err) => Err(Error::OS(err)),
        }
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}
