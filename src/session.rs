use tracing::{debug, info, warn};

use crate::cmd::Command;
use crate::error::Result;
use crate::inspector::{Inspector, Word};
use crate::tracer::{Pid, Stop, Tracer};


/// What a traced run of one program observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecReport {
    pub pid: Pid,

    /// Raw syscall-number register word at the exec stop.
    pub syscall_number: Word,

    /// How the tracee terminated.
    pub exit: Stop,
}

/// Spawn `cmd`, read its syscall-number register at the exec stop, then run it
/// to completion.
///
/// Stops after the exec are resumed without delivering their signal. If the
/// register read fails, the tracee is killed and the read error is returned.
pub fn trace_exec(tracer: &mut Tracer, cmd: &Command, inspector: &Inspector) -> Result<ExecReport> {
    let mut tracee = tracer.spawn(cmd)?;
    let pid = tracee.pid();

    tracer.wait_for_exec(&mut tracee)?;

    let syscall_number = match inspector.read_syscall_number(&tracee) {
        Ok(word) => word,
        Err(err) => {
            if let Err(kill_err) = tracer.kill(&mut tracee) {
                warn!(pid = pid.as_raw(), %kill_err, "failed to kill tracee after read error");
            }
            return Err(err);
        },
    };

    info!(pid = pid.as_raw(), syscall_number, "read syscall number at exec stop");

    tracer.resume(&mut tracee)?;

    let exit = loop {
        let stop = tracer.wait(&mut tracee)?;

        if stop.is_terminal() {
            break stop;
        }

        debug!(pid = pid.as_raw(), ?stop, "resuming past stop");
        tracer.resume(&mut tracee)?;
    };

    Ok(ExecReport { pid, syscall_number, exit })
}
