use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;

use nix::{
    sys::ptrace,
    unistd::{fork, ForkResult, Pid},
};

use crate::error::{Error, Result};


/// Exit status of a forked child whose exec failed.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Exit status of a forked child whose `PTRACE_TRACEME` request failed.
pub const TRACEME_FAILURE_STATUS: i32 = 126;

/// Program image to spawn as a traced child process.
#[derive(Clone, Debug)]
pub struct Command {
    /// Path passed to `execve()`.
    program: CString,

    /// Argument vector passed to `execve()`, including `argv[0]`.
    argv: Vec<CString>,

    /// `KEY=VALUE` entries of an explicit environment. If `None`, the child
    /// inherits ours.
    env: Option<Vec<CString>>,
}

impl Command {
    /// Command for `program`, with `argv[0]` set to `program`.
    pub fn new(program: impl AsRef<OsStr>) -> Result<Self> {
        let program = to_cstring(program)?;
        let argv = vec![program.clone()];
        let env = None;

        Ok(Self { program, argv, env })
    }

    /// Append arguments after `argv[0]`.
    pub fn args<I, S>(mut self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.argv.push(to_cstring(arg)?);
        }

        Ok(self)
    }

    /// Override `argv[0]`, which otherwise equals the program path.
    pub fn argv0(mut self, arg0: impl AsRef<OsStr>) -> Result<Self> {
        self.argv[0] = to_cstring(arg0)?;
        Ok(self)
    }

    /// Add `key=value` to the explicit environment.
    ///
    /// Once any variable is set, the child gets exactly the explicit
    /// environment, and inherits nothing.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Result<Self> {
        let mut entry = key.as_ref().as_bytes().to_vec();
        entry.push(b'=');
        entry.extend_from_slice(value.as_ref().as_bytes());

        self.env.get_or_insert_with(Vec::new).push(CString::new(entry)?);
        Ok(self)
    }

    /// Start the child with an empty environment, plus any later [`env()`](Command::env).
    pub fn env_clear(mut self) -> Self {
        self.env = Some(vec![]);
        self
    }

    pub fn program(&self) -> &CStr {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// The explicit environment, or `None` if the child inherits ours.
    pub fn envp(&self) -> Option<&[CString]> {
        self.env.as_deref()
    }

    /// Fork, then in the child declare `PTRACE_TRACEME` and exec `self.program`.
    ///
    /// A failed exec is not reported here. The child exits with
    /// [`EXEC_FAILURE_STATUS`], which the parent observes on its next wait.
    pub(crate) fn fork_exec(&self) -> Result<Pid> {
        // Heap-allocates, must occur pre-fork.
        let argv = null_terminated(&self.argv);
        let envp = self.env.as_deref().map(null_terminated);

        let fork_result = unsafe { fork() }.map_err(|source| Error::Spawn { source })?;

        match fork_result {
            ForkResult::Child => {
                // Only async-signal-safe calls from here on: no allocation, no
                // unwinding back into the parent's copy of the stack.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(TRACEME_FAILURE_STATUS) }
                }

                // Use unsafe `libc` execs, because the `nix` wrappers heap-allocate
                // internally, which is not async-signal-safe.
                unsafe {
                    match &envp {
                        Some(envp) => libc::execve(self.program.as_ptr(), argv.as_ptr(), envp.as_ptr()),
                        None => libc::execv(self.program.as_ptr(), argv.as_ptr()),
                    };
                    libc::_exit(EXEC_FAILURE_STATUS)
                }
            },
            ForkResult::Parent { child } => {
                Ok(child)
            },
        }
    }
}

// NULL-terminated pointer array over `strings`, as `argv` and `envp` are passed.
fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    let mut ptrs: Vec<_> = strings
        .iter()
        .map(|s| s.as_ptr())
        .collect();
    ptrs.push(std::ptr::null());
    ptrs
}

fn to_cstring(s: impl AsRef<OsStr>) -> Result<CString> {
    Ok(CString::new(s.as_ref().as_bytes())?)
}
