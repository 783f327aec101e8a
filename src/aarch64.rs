//! aarch64 register file.
//!
//! arm64 has no `PTRACE_PEEKUSER`, so the general-purpose registers are read as
//! a whole with `PTRACE_GETREGSET` and indexed by byte offset afterwards.

use std::mem::{size_of, MaybeUninit};

use nix::{errno::Errno, unistd::Pid};


/// Linux constant defined in `include/uapi/linux/elf.h`.
const NT_PRSTATUS: libc::c_int = 0x1;

/// Defined in [`arch/arm64/include/uapi/asm/ptrace.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/arch/arm64/include/uapi/asm/ptrace.h#88).
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct user_pt_regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64
}

impl user_pt_regs {
    /// Word at byte `offset`, if it is word-aligned and in bounds.
    pub(crate) fn word_at(&self, offset: u64) -> Option<u64> {
        if offset % 8 != 0 {
            return None;
        }

        let index = (offset / 8) as usize;

        match index {
            0..=30 => Some(self.regs[index]),
            31 => Some(self.sp),
            32 => Some(self.pc),
            33 => Some(self.pstate),
            _ => None,
        }
    }
}

pub(crate) fn read_regs(pid: Pid) -> nix::Result<user_pt_regs> {
    let mut data = MaybeUninit::<user_pt_regs>::uninit();
    let mut rv = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: size_of::<user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(libc::PTRACE_GETREGSET, pid.as_raw(), NT_PRSTATUS, &mut rv as *mut _ as *mut libc::c_void)
    };

    Errno::result(res)?;

    Ok(unsafe { data.assume_init() })
}
