use anyhow::Result;
use execpeek::{Command, Signal, Stop, Tracee, Tracer};

#[allow(unused)]
pub const LS: &str = "/bin/ls";
#[allow(unused)]
pub const TRUE: &str = "/bin/true";
#[allow(unused)]
pub const SLEEP: &str = "/bin/sleep";
#[allow(unused)]
pub const SH: &str = "/bin/sh";

// Like `assert!(matches!(..))`, but names the expression on failure.
#[allow(unused)]
macro_rules! assert_matches {
    ($expr: expr, $pat: pat) => {
        if let $pat = $expr {
            // Pass.
        } else {
            panic!("expected `{}` to match `{}`", stringify!($expr), stringify!($pat));
        }
    }
}

#[allow(unused)]
pub fn sleep_cmd(secs: u32) -> Result<Command> {
    Ok(Command::new(SLEEP)?.args(&[secs.to_string()])?)
}

/// Resume through every stop until the tracee terminates.
#[allow(unused)]
pub fn run_to_exit(tracer: &mut Tracer, tracee: &mut Tracee) -> Result<Stop> {
    tracer.resume(tracee)?;

    loop {
        let stop = tracer.wait(tracee)?;
        eprintln!("{}: {:?}", tracee.pid(), stop);

        if stop.is_terminal() {
            return Ok(stop);
        }

        tracer.resume(tracee)?;
    }
}

/// Wait for the `SIGSTOP` of a fresh attach.
///
/// A process attached before its own exec has finished first reports the
/// exec `SIGTRAP`, which is resumed past. Returns the stops skipped.
#[allow(unused)]
pub fn wait_for_attach(tracer: &mut Tracer, tracee: &mut Tracee) -> Result<Vec<Stop>> {
    let mut skipped = vec![];

    loop {
        match tracer.wait(tracee)? {
            Stop::Attach => return Ok(skipped),
            stop @ Stop::Signal { signal: Signal::SIGTRAP } => {
                skipped.push(stop);
                tracer.resume(tracee)?;
            },
            stop => anyhow::bail!("unexpected stop before attach: {:?}", stop),
        }
    }
}
