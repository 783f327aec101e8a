use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use execpeek::{Command, Error, Inspector, State, Stop, Tracer};

#[macro_use]
mod support;
use support::*;

#[test]
#[timeout(2000)]
fn test_resume_requires_stop() -> Result<()> {
    let cmd = Command::new(TRUE)?;

    let mut tracer = Tracer::new();
    let mut tracee = tracer.spawn(&cmd)?;

    // Not yet stopped at exec.
    assert_matches!(
        tracer.resume(&mut tracee),
        Err(Error::InvalidState { state: State::Attached, op: "resume", .. })
    );
    assert_eq!(tracee.state(), State::Attached);

    assert_eq!(tracer.wait(&mut tracee)?, Stop::Exec);
    tracer.resume(&mut tracee)?;
    assert_eq!(tracee.state(), State::Running);

    // Already running.
    assert_matches!(
        tracer.resume(&mut tracee),
        Err(Error::InvalidState { state: State::Running, .. })
    );

    assert_eq!(tracer.wait(&mut tracee)?, Stop::Exited { exit_code: 0 });
    assert_eq!(tracee.state(), State::Exited);

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_no_inspection_while_running() -> Result<()> {
    let cmd = sleep_cmd(10)?;
    let inspector = Inspector::native()?;

    let mut tracer = Tracer::new();
    let mut tracee = tracer.spawn(&cmd)?;
    tracer.wait_for_exec(&mut tracee)?;
    tracer.resume(&mut tracee)?;

    assert_matches!(
        inspector.read_syscall_number(&tracee),
        Err(Error::InvalidState { state: State::Running, .. })
    );
    assert_matches!(
        inspector.read_memory_word(&tracee, 0x1000),
        Err(Error::InvalidState { state: State::Running, .. })
    );

    let stop = tracer.kill(&mut tracee)?;
    assert_matches!(stop, Stop::Signaled { signal: execpeek::Signal::SIGKILL, .. });

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_wait_while_stopped_rejected() -> Result<()> {
    let cmd = Command::new(TRUE)?;

    let mut tracer = Tracer::new();
    let mut tracee = tracer.spawn(&cmd)?;
    tracer.wait_for_exec(&mut tracee)?;

    // Would block forever: a stopped tracee only changes state once resumed.
    assert_matches!(
        tracer.wait(&mut tracee),
        Err(Error::InvalidState { state: State::Stopped, .. })
    );

    let exit = run_to_exit(&mut tracer, &mut tracee)?;
    assert!(exit.success());

    Ok(())
}

#[test]
#[timeout(2000)]
fn test_other_tracer_rejected() -> Result<()> {
    let cmd = Command::new(TRUE)?;

    let mut tracer = Tracer::new();
    let mut other = Tracer::new();

    let mut tracee = tracer.spawn(&cmd)?;
    tracer.wait_for_exec(&mut tracee)?;

    assert_matches!(other.resume(&mut tracee), Err(Error::NotOwned { .. }));
    assert_eq!(tracee.state(), State::Stopped);

    let exit = run_to_exit(&mut tracer, &mut tracee)?;
    assert!(exit.success());

    Ok(())
}
