//! Byte-level process memory access and program-counter access via `ptrace`.

use crate::error::{Error, Result};
use nix::libc::c_void;
use nix::sys;
use nix::unistd::Pid;

/// Read the 8-bit byte at `addr` in `pid`'s address space.
pub fn read_byte(pid: Pid, addr: u64) -> Result<u8> {
    let word = sys::ptrace::read(pid, addr as *mut c_void).map_err(Error::Ptrace)?;
    Ok((word as u64 & 0xff) as u8)
}

/// Overwrite the 8-bit byte at `addr`, leaving the rest of the containing word untouched.
pub fn write_byte(pid: Pid, addr: u64, byte: u8) -> Result<()> {
    let word = sys::ptrace::read(pid, addr as *mut c_void).map_err(Error::Ptrace)? as u64;
    let patched = (word & !0xffu64) | byte as u64;
    unsafe {
        sys::ptrace::write(pid, addr as *mut c_void, patched as *mut c_void)
            .map_err(Error::Ptrace)?;
    }
    Ok(())
}

/// Current instruction pointer.
pub fn get_pc(pid: Pid) -> Result<u64> {
    Ok(sys::ptrace::getregs(pid).map_err(Error::Ptrace)?.rip)
}

/// Move the instruction pointer to `addr`.
pub fn set_pc(pid: Pid, addr: u64) -> Result<()> {
    let mut regs = sys::ptrace::getregs(pid).map_err(Error::Ptrace)?;
    regs.rip = addr;
    sys::ptrace::setregs(pid, regs).map_err(Error::Ptrace)
}
