#[macro_use]
pub mod error;

pub mod arch;
pub mod cmd;
pub mod inspector;
pub mod session;
pub mod tracer;

#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(target_arch = "x86_64")]
mod x86;

pub use arch::{Arch, Register, RegisterLayout, RegisterOffset};
pub use cmd::Command;
pub use error::Error;
pub use inspector::{InspectionResult, Inspector, Word};
pub use session::{trace_exec, ExecReport};
pub use tracer::{Pid, Signal, State, Stop, Tracee, Tracer};
