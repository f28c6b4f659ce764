//! Translates raw `waitpid`/`ptrace` notifications into the engine's
//! platform-agnostic `Event` set (SPEC_FULL.md §4.A).

use crate::engine::code;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use nix::{libc, sys};
use std::path::PathBuf;

/// A debug-event, abstracted away from the underlying OS debugging API.
#[derive(Debug)]
pub enum Event {
    /// The debuggee's main image has just been mapped and is about to run
    /// its entry point. On Linux this is synthesized from `PTRACE_EVENT_EXEC`
    /// and also serves as the "entry breakpoint" hand-back (SPEC_FULL.md §4.D).
    CreateProcess { image_file: PathBuf, pid: Pid },
    /// A shared library was loaded. Unreachable from the concrete Linux
    /// binding (SPEC_FULL.md §4.A) — kept for interface completeness.
    LoadImage { image_file: PathBuf, base: u64 },
    /// A software breakpoint trapped.
    Breakpoint { addr: u64, pid: Pid },
    /// A single-step trap fired.
    SingleStep { pid: Pid },
    /// The debuggee process exited.
    ExitProcess { code: i32 },
    /// Anything else; the engine continues the debuggee unconditionally.
    Other,
}

/// How to acknowledge a consumed event.
#[derive(Debug, Clone, Copy)]
pub enum ContinueStatus {
    Continue,
    Forward(Signal),
}

/// Block until the next debug event for `pid`'s process group arrives.
pub fn wait_event(pid: Pid) -> Result<Event> {
    let status = match waitpid(Pid::from_raw(-1), None) {
        Ok(status) => status,
        Err(Errno::ECHILD) => return Ok(Event::ExitProcess { code: 0 }),
        Err(e) => return Err(Error::Waitpid(e)),
    };
    classify(pid, status)
}

/// Non-blocking variant of `wait_event`: returns `Ok(None)` immediately if no
/// debug event is currently pending instead of blocking in `waitpid`.
pub fn poll_event(pid: Pid) -> Result<Option<Event>> {
    let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => return Ok(None),
        Ok(status) => status,
        Err(Errno::ECHILD) => return Ok(Some(Event::ExitProcess { code: 0 })),
        Err(e) => return Err(Error::Waitpid(e)),
    };
    classify(pid, status).map(Some)
}

fn classify(pid: Pid, status: WaitStatus) -> Result<Event> {
    match status {
        WaitStatus::Exited(exited_pid, code) if exited_pid == pid => {
            Ok(Event::ExitProcess { code })
        }
        WaitStatus::Exited(_, _) => Ok(Event::Other),
        WaitStatus::PtraceEvent(event_pid, _signal, code) => match code {
            libc::PTRACE_EVENT_EXEC => {
                let image_file = std::fs::read_link(format!("/proc/{event_pid}/exe"))
                    .unwrap_or_default();
                Ok(Event::CreateProcess {
                    image_file,
                    pid: event_pid,
                })
            }
            libc::PTRACE_EVENT_EXIT => Ok(Event::Other),
            _ => Ok(Event::Other),
        },
        WaitStatus::Stopped(stop_pid, signal) => {
            let info = match sys::ptrace::getsiginfo(stop_pid) {
                Ok(info) => info,
                Err(Errno::ESRCH) => return Ok(Event::Other),
                Err(e) => return Err(Error::Ptrace(e)),
            };

            match signal {
                Signal::SIGTRAP => match info.si_code {
                    code::TRAP_BRKPT | code::SI_KERNEL => {
                        let pc = crate::engine::memory::get_pc(stop_pid)?;
                        // The reported pc is one byte past the trap; the
                        // breakpoint address is pc - 1 (SPEC_FULL.md §4.D).
                        Ok(Event::Breakpoint {
                            addr: pc - 1,
                            pid: stop_pid,
                        })
                    }
                    code::TRAP_TRACE => Ok(Event::SingleStep { pid: stop_pid }),
                    _ => Ok(Event::Other),
                },
                _ => Ok(Event::Other),
            }
        }
        WaitStatus::Signaled(signaled_pid, _, _) if signaled_pid == pid => {
            Ok(Event::ExitProcess { code: -1 })
        }
        _ => Ok(Event::Other),
    }
}

/// Acknowledge the event just handled and let the debuggee continue.
pub fn continue_event(pid: Pid, status: ContinueStatus) -> Result<()> {
    let signal = match status {
        ContinueStatus::Continue => None,
        ContinueStatus::Forward(sig) => Some(sig),
    };
    sys::ptrace::cont(pid, signal).map_err(Error::Ptrace)
}

/// Single-step one instruction. Returns `Ok(None)` on the expected
/// `TRAP_TRACE` stop, or `Ok(Some(code))` if the stepped instruction itself
/// terminated the tracee (the caller must not rearm a breakpoint or rewrite
/// memory for a pid that no longer exists).
pub fn single_step(pid: Pid) -> Result<Option<i32>> {
    sys::ptrace::step(pid, None).map_err(Error::Ptrace)?;
    match waitpid(pid, None).map_err(Error::Waitpid)? {
        WaitStatus::Exited(_, code) => Ok(Some(code)),
        WaitStatus::Signaled(..) => Ok(Some(-1)),
        _ => Ok(None),
    }
}
