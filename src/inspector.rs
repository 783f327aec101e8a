//! Reading memory and register-file words out of a stopped tracee.
//!
//! Every read requires the [`Tracee`] to be [`State::Stopped`](crate::tracer::State::Stopped).
//! Values read are snapshots, stale as soon as the tracee is resumed.

use std::mem::size_of;

use nix::{errno::Errno, unistd::Pid};
use tracing::debug;

use crate::arch::{Register, RegisterLayout, RegisterOffset};
use crate::error::{Error, Result};
use crate::tracer::Tracee;

#[cfg(target_arch = "aarch64")]
use crate::aarch64;


/// Signed machine word, as returned by `PTRACE_PEEK*` requests.
pub type Word = libc::c_long;

/// A [`Word`] read from a stopped tracee, or why it could not be read.
pub type InspectionResult = Result<Word>;

/// Upper bound on words scanned by [`Inspector::read_string()`] and
/// pointers followed by [`Inspector::read_string_array()`].
const MAX_SCAN_WORDS: usize = 1 << 14;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Request = libc::c_uint;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Request = libc::c_int;

/// Reads tracee state using an injected [`RegisterLayout`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inspector {
    layout: RegisterLayout,
}

impl Inspector {
    /// Inspector using `layout` for every register read.
    ///
    /// The layout must describe the tracee's architecture. A mismatched layout
    /// reads the wrong slots rather than failing.
    pub fn new(layout: RegisterLayout) -> Self {
        Self { layout }
    }

    /// Inspector for the compile target's register layout.
    pub fn native() -> Result<Self> {
        Ok(Self::new(RegisterLayout::native()?))
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    /// Read one word of the tracee's memory at virtual address `addr`.
    pub fn read_memory_word(&self, tracee: &Tracee, addr: u64) -> InspectionResult {
        tracee.ensure_stopped("read memory of")?;

        let pid = tracee.pid();
        let word = peek(libc::PTRACE_PEEKDATA, pid, addr)
            .map_err(|source| Error::MemoryRead { pid, addr, source })?;

        debug!(pid = pid.as_raw(), addr, word, "read memory word");

        Ok(word)
    }

    /// Read the register-file word at `reg.offset`.
    pub fn read_register(&self, tracee: &Tracee, reg: RegisterOffset) -> InspectionResult {
        tracee.ensure_stopped("read registers of")?;

        let pid = tracee.pid();
        let word = peek_register_file(pid, reg.offset)?;

        debug!(pid = pid.as_raw(), register = ?reg.register, offset = reg.offset, word, "read register");

        Ok(word)
    }

    /// Read the syscall-number register, at the offset given by this inspector's layout.
    ///
    /// At the exec stop of a spawned tracee, this is the number of the exec
    /// syscall that just completed.
    pub fn read_syscall_number(&self, tracee: &Tracee) -> InspectionResult {
        self.read_register(tracee, self.layout.syscall_number())
    }

    pub fn read_stack_pointer(&self, tracee: &Tracee) -> InspectionResult {
        self.read_register(tracee, self.layout.offset(Register::StackPointer))
    }

    pub fn read_instruction_pointer(&self, tracee: &Tracee) -> InspectionResult {
        self.read_register(tracee, self.layout.offset(Register::InstructionPointer))
    }

    /// Read a NUL-terminated byte string starting at `addr`, without the NUL.
    pub fn read_string(&self, tracee: &Tracee, addr: u64) -> Result<Vec<u8>> {
        let mut bytes = vec![];
        let mut next = addr;

        for _ in 0..MAX_SCAN_WORDS {
            let word = self.read_memory_word(tracee, next)?;

            for byte in word.to_ne_bytes().iter().copied() {
                if byte == 0 {
                    return Ok(bytes);
                }
                bytes.push(byte);
            }

            next = next_word(tracee.pid(), next)?;
        }

        Err(Error::MemoryRead { pid: tracee.pid(), addr, source: Errno::E2BIG })
    }

    /// Read a NULL-terminated array of string pointers starting at `addr`, such
    /// as an `argv` or `envp` vector.
    pub fn read_string_array(&self, tracee: &Tracee, addr: u64) -> Result<Vec<Vec<u8>>> {
        let mut strings = vec![];
        let mut next = addr;

        for _ in 0..MAX_SCAN_WORDS {
            let ptr = self.read_memory_word(tracee, next)?;

            if ptr == 0 {
                return Ok(strings);
            }

            strings.push(self.read_string(tracee, ptr as u64)?);
            next = next_word(tracee.pid(), next)?;
        }

        Err(Error::MemoryRead { pid: tracee.pid(), addr, source: Errno::E2BIG })
    }

    /// Read the argument vector of the new image from the initial process stack.
    ///
    /// Only meaningful at the exec stop, when the stack pointer still addresses
    /// `argc`, followed by the `argv` pointers.
    pub fn read_exec_argv(&self, tracee: &Tracee) -> Result<Vec<Vec<u8>>> {
        let sp = self.read_stack_pointer(tracee)? as u64;
        let argv = next_word(tracee.pid(), sp)?;

        self.read_string_array(tracee, argv)
    }

    /// Read the environment of the new image from the initial process stack.
    ///
    /// Only meaningful at the exec stop. The `envp` pointers follow the
    /// NULL that terminates `argv`.
    pub fn read_exec_envp(&self, tracee: &Tracee) -> Result<Vec<Vec<u8>>> {
        let pid = tracee.pid();
        let sp = self.read_stack_pointer(tracee)? as u64;
        let argc = self.read_memory_word(tracee, sp)? as u64;

        // Skip `argc`, then `argc` pointers and their NULL terminator.
        let skip = argc
            .checked_add(2)
            .and_then(|words| words.checked_mul(size_of::<Word>() as u64))
            .and_then(|bytes| sp.checked_add(bytes));

        match skip {
            Some(envp) => self.read_string_array(tracee, envp),
            None => Err(Error::MemoryRead { pid, addr: sp, source: Errno::EFAULT }),
        }
    }
}

fn next_word(pid: Pid, addr: u64) -> Result<u64> {
    match addr.checked_add(size_of::<Word>() as u64) {
        Some(next) => Ok(next),
        None => Err(Error::MemoryRead { pid, addr, source: Errno::EFAULT }),
    }
}

/// Issue a `PTRACE_PEEK*` request.
///
/// The raw request returns `-1` both on failure and for a word whose value is
/// `-1`. `errno` is cleared first and consulted only for a `-1` result, so a
/// legitimate `-1` word is returned as data.
fn peek(request: Request, pid: Pid, addr: u64) -> nix::Result<Word> {
    let word = unsafe {
        Errno::clear();
        libc::ptrace(
            request,
            pid.as_raw(),
            addr as *mut libc::c_void,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    if word != -1 {
        return Ok(word);
    }

    match Errno::last() {
        Errno::UnknownErrno => Ok(word),
        errno => Err(errno),
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
fn peek_register_file(pid: Pid, offset: u64) -> Result<Word> {
    peek(libc::PTRACE_PEEKUSER, pid, offset)
        .map_err(|source| Error::RegisterRead { pid, offset, source })
}

#[cfg(target_arch = "aarch64")]
fn peek_register_file(pid: Pid, offset: u64) -> Result<Word> {
    let regs = aarch64::read_regs(pid)
        .map_err(|source| Error::RegisterRead { pid, offset, source })?;

    match regs.word_at(offset) {
        Some(word) => Ok(word as Word),
        // Same as the kernel's answer to an out-of-range `PEEKUSER` offset.
        None => Err(Error::RegisterRead { pid, offset, source: Errno::EIO }),
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
fn peek_register_file(_pid: Pid, _offset: u64) -> Result<Word> {
    Err(Error::UnsupportedArch(std::env::consts::ARCH.into()))
}

/// True if `word` is the target's `execve` syscall number.
pub fn is_execve(word: Word) -> bool {
    word == libc::SYS_execve as Word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_nonexistent_pid_is_error() {
        // Not our tracee, so the kernel answers `ESRCH` through `errno`.
        let pid = Pid::from_raw(i32::MAX);
        let res = peek(libc::PTRACE_PEEKDATA, pid, 0);

        assert_eq!(res, Err(Errno::ESRCH));
    }

    #[test]
    fn test_next_word_overflow() {
        let pid = Pid::from_raw(1);

        assert_eq!(next_word(pid, 0x1000).unwrap(), 0x1000 + size_of::<Word>() as u64);
        assert!(matches!(
            next_word(pid, u64::MAX),
            Err(Error::MemoryRead { source: Errno::EFAULT, .. })
        ));
    }

    #[test]
    fn test_is_execve() {
        assert!(is_execve(libc::SYS_execve as Word));
        assert!(!is_execve(libc::SYS_execveat as Word));
        assert!(!is_execve(-1));
    }
}
