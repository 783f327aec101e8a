use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use execpeek::{cmd::EXEC_FAILURE_STATUS, trace_exec, Command, Error, Inspector, State, Stop, Tracer};

#[macro_use]
mod support;

#[test]
#[timeout(2000)]
fn test_missing_program_exits_before_stop() -> Result<()> {
    let cmd = Command::new("/nonexistent/program")?;
    let inspector = Inspector::native()?;

    let mut tracer = Tracer::new();
    let mut tracee = tracer.spawn(&cmd)?;
    let pid = tracee.pid();

    let stop = tracer.wait(&mut tracee)?;
    eprintln!("{}: {:?}", pid, stop);

    assert_eq!(stop, Stop::Exited { exit_code: EXEC_FAILURE_STATUS });
    assert!(!stop.success());
    assert_eq!(tracee.state(), State::Failed);
    assert!(!tracer.is_tracing(pid));

    // Terminal: nothing else may be done with the tracee.
    assert_matches!(inspector.read_syscall_number(&tracee), Err(Error::NoSuchProcess { .. }));
    assert_matches!(inspector.read_memory_word(&tracee, 0x1000), Err(Error::NoSuchProcess { .. }));
    assert_matches!(tracer.resume(&mut tracee), Err(Error::NoSuchProcess { .. }));
    assert_matches!(tracer.wait(&mut tracee), Err(Error::NoSuchProcess { .. }));
    assert_matches!(tracer.kill(&mut tracee), Err(Error::NoSuchProcess { .. }));

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_wait_for_exec_reports_exec_error() -> Result<()> {
    // A directory cannot be executed.
    let cmd = Command::new("/")?;

    let mut tracer = Tracer::new();
    let mut tracee = tracer.spawn(&cmd)?;

    let err = tracer.wait_for_exec(&mut tracee).unwrap_err();
    eprintln!("{}", err);

    assert_matches!(
        err,
        Error::Exec { stop: Stop::Exited { exit_code: EXEC_FAILURE_STATUS }, .. }
    );
    assert_eq!(tracee.state(), State::Failed);

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_trace_exec_missing_program() -> Result<()> {
    let cmd = Command::new("/nonexistent/program")?;
    let inspector = Inspector::native()?;
    let mut tracer = Tracer::new();

    let res = trace_exec(&mut tracer, &cmd, &inspector);
    assert_matches!(res, Err(Error::Exec { .. }));

    Ok(())
}
