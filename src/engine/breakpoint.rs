//! Software breakpoints: a one-byte `0xCC` trap installed over the first byte
//! of an instruction, keyed in a table by the address it was installed at.

use crate::engine::memory;
use crate::error::{Error, Result};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;

const TRAP_BYTE: u8 = 0xCC;

/// A breakpoint's static origin: the source location it was armed for.
#[derive(Debug, Clone)]
pub struct BreakpointOrigin {
    pub file: PathBuf,
    pub line: u64,
}

/// A single installed trap.
#[derive(Debug)]
struct Breakpoint {
    origin: BreakpointOrigin,
    original_byte: u8,
    /// `false` in the brief window between `service()` restoring the original
    /// byte and the trap being re-armed for the next pass over this address.
    armed: bool,
}

/// All breakpoints currently known to the engine, keyed by the address the
/// trap byte was written to.
#[derive(Default)]
pub struct BreakpointTable {
    by_addr: HashMap<u64, Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the trap byte at `addr` and remember what it displaced.
    ///
    /// Installing twice at the same address without an intervening `remove`
    /// is a programming error.
    pub fn install(&mut self, pid: Pid, addr: u64, origin: BreakpointOrigin) -> Result<()> {
        if self.by_addr.contains_key(&addr) {
            return Err(Error::BreakpointAlreadyInstalled(addr));
        }
        let original_byte = memory::read_byte(pid, addr)?;
        memory::write_byte(pid, addr, TRAP_BYTE)?;
        self.by_addr.insert(
            addr,
            Breakpoint {
                origin,
                original_byte,
                armed: true,
            },
        );
        Ok(())
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.by_addr.contains_key(&addr)
    }

    pub fn origin(&self, addr: u64) -> Option<&BreakpointOrigin> {
        self.by_addr.get(&addr).map(|b| &b.origin)
    }

    /// Service a trap at `addr`: restore the original byte, rewind the
    /// tracee's program counter from `addr + 1` back to `addr`, then
    /// immediately re-arm the trap so the line is counted again the next
    /// time it executes (see SPEC_FULL.md §9, "Re-arming after hit").
    ///
    /// Returns the breakpoint's origin for dispatch to observers.
    pub fn service(&mut self, pid: Pid, addr: u64) -> Result<BreakpointOrigin> {
        let bp = self
            .by_addr
            .get_mut(&addr)
            .ok_or(Error::BreakpointNotFound(addr))?;

        memory::write_byte(pid, addr, bp.original_byte)?;
        memory::set_pc(pid, addr)?;
        bp.armed = false;
        let origin = bp.origin.clone();

        // Caller must single-step past addr before calling rearm.
        Ok(origin)
    }

    /// Re-install the trap byte after the caller has single-stepped the
    /// original instruction out from under it.
    pub fn rearm(&mut self, pid: Pid, addr: u64) -> Result<()> {
        let bp = self
            .by_addr
            .get_mut(&addr)
            .ok_or(Error::BreakpointNotFound(addr))?;
        if !bp.armed {
            memory::write_byte(pid, addr, TRAP_BYTE)?;
            bp.armed = true;
        }
        Ok(())
    }

    pub fn is_armed(&self, addr: u64) -> bool {
        self.by_addr.get(&addr).map(|b| b.armed).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}
