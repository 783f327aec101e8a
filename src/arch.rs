//! Register-file layouts, keyed by target architecture.
//!
//! A [`RegisterLayout`] is chosen once at startup and handed to the
//! [`Inspector`](crate::inspector::Inspector). Inspection code never embeds an
//! architecture-specific offset itself.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[cfg(target_arch = "x86_64")]
use crate::x86;


/// Architectures with a known register-file layout.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
}

impl Arch {
    /// The architecture this crate was compiled for.
    pub fn native() -> Result<Self> {
        if cfg!(target_arch = "x86_64") {
            Ok(Arch::X86_64)
        } else if cfg!(target_arch = "x86") {
            Ok(Arch::X86)
        } else if cfg!(target_arch = "aarch64") {
            Ok(Arch::Aarch64)
        } else {
            Err(Error::UnsupportedArch(std::env::consts::ARCH.into()))
        }
    }

    /// Size in bytes of one machine word, and so of one register slot.
    pub fn word_size(self) -> u64 {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 | Arch::Aarch64 => 8,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Aarch64 => "aarch64",
        };
        f.write_str(name)
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "x86" | "i386" | "i686" => Ok(Arch::X86),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            _ => Err(Error::UnsupportedArch(s.into())),
        }
    }
}

/// Logical register names, independent of any one architecture.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Register {
    /// Holds the number of the syscall being entered, or just completed, at a
    /// syscall-related stop. `orig_rax` on x86_64, `orig_eax` on x86.
    ///
    /// Only the x86 layouts locate the number reliably. The aarch64 slot is
    /// `x8`, which carries the number at syscall entry but is cleared by the
    /// time of the exec stop. There the kernel keeps it in `syscallno`, outside
    /// `user_pt_regs` (see `NT_ARM_SYSTEM_CALL`).
    SyscallNumber = 0,
    InstructionPointer,
    StackPointer,
}

const REGISTERS: usize = 3;

/// Byte offset of a logical register within the tracee's register file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RegisterOffset {
    pub register: Register,
    pub offset: u64,
}

impl RegisterOffset {
    const fn slot(register: Register, index: u64, word_size: u64) -> Self {
        Self { register, offset: index * word_size }
    }
}

/// Read-only map from [`Register`] to [`RegisterOffset`] for one architecture.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterLayout {
    arch: Arch,
    offsets: [RegisterOffset; REGISTERS],
}

// Slot indices are those of `struct user_regs_struct` (x86, x86_64) and
// `struct user_pt_regs` (aarch64), see `sys/reg.h` and `asm/ptrace.h`.
static LAYOUTS: [RegisterLayout; 3] = [
    RegisterLayout {
        arch: Arch::X86_64,
        offsets: [
            RegisterOffset::slot(Register::SyscallNumber, 15, 8),      // ORIG_RAX
            RegisterOffset::slot(Register::InstructionPointer, 16, 8), // RIP
            RegisterOffset::slot(Register::StackPointer, 19, 8),       // RSP
        ],
    },
    RegisterLayout {
        arch: Arch::X86,
        offsets: [
            RegisterOffset::slot(Register::SyscallNumber, 11, 4),      // ORIG_EAX
            RegisterOffset::slot(Register::InstructionPointer, 12, 4), // EIP
            RegisterOffset::slot(Register::StackPointer, 15, 4),       // UESP
        ],
    },
    RegisterLayout {
        arch: Arch::Aarch64,
        offsets: [
            RegisterOffset::slot(Register::SyscallNumber, 8, 8),       // x8, entry only
            RegisterOffset::slot(Register::InstructionPointer, 32, 8), // pc
            RegisterOffset::slot(Register::StackPointer, 31, 8),       // sp
        ],
    },
];

impl RegisterLayout {
    /// Layout from the static table for `arch`.
    pub fn for_arch(arch: Arch) -> Self {
        let layout = LAYOUTS.iter().find(|l| l.arch == arch);

        // Every `Arch` variant has a table entry.
        match layout {
            Some(layout) => *layout,
            None => unreachable!("no register layout for {}", arch),
        }
    }

    /// Layout of the compile target.
    ///
    /// On x86_64 the offsets are derived from `libc::user_regs_struct` itself.
    #[cfg(target_arch = "x86_64")]
    pub fn native() -> Result<Self> {
        let offsets = [
            RegisterOffset { register: Register::SyscallNumber, offset: x86::orig_rax_offset() },
            RegisterOffset { register: Register::InstructionPointer, offset: x86::rip_offset() },
            RegisterOffset { register: Register::StackPointer, offset: x86::rsp_offset() },
        ];

        Ok(Self { arch: Arch::X86_64, offsets })
    }

    /// Layout of the compile target.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn native() -> Result<Self> {
        Ok(Self::for_arch(Arch::native()?))
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn word_size(&self) -> u64 {
        self.arch.word_size()
    }

    pub fn offset(&self, register: Register) -> RegisterOffset {
        self.offsets[register as usize]
    }

    pub fn syscall_number(&self) -> RegisterOffset {
        self.offset(Register::SyscallNumber)
    }
}
