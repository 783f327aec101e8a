//! x86_64 register file, as exposed by `PTRACE_PEEKUSER`.
//!
//! `struct user_regs_struct` is the first member of the virtual `struct user`,
//! so its field offsets are also `PEEKUSER` offsets.

use memoffset::offset_of;


pub(crate) fn orig_rax_offset() -> u64 {
    offset_of!(libc::user_regs_struct, orig_rax) as u64
}

pub(crate) fn rip_offset() -> u64 {
    offset_of!(libc::user_regs_struct, rip) as u64
}

pub(crate) fn rsp_offset() -> u64 {
    offset_of!(libc::user_regs_struct, rsp) as u64
}
