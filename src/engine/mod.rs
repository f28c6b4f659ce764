//! The debugger engine: a two-phase state machine driving a `ptrace`d
//! debuggee through its debug-event stream, dispatching observer callbacks
//! at well-defined points (SPEC_FULL.md §4.D).

pub mod breakpoint;
mod code;
mod event;
pub mod memory;
pub mod process;
pub mod symbols;

use crate::engine::breakpoint::{BreakpointOrigin, BreakpointTable};
use crate::engine::event::{ContinueStatus, Event};
use crate::engine::process::{Child, Installed};
use crate::engine::symbols::SymbolIndex;
use crate::error::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

/// A breakpoint's full identity, handed to `EventHook::on_break_point`.
#[derive(Debug, Clone)]
pub struct BreakPointInfo {
    pub file: PathBuf,
    pub line: u64,
    pub addr: u64,
}

/// Capability bundle for observing engine events, with no-op defaults
/// (SPEC_FULL.md §9, "Observer pattern without deep inheritance"). The
/// coverage ledger is the only implementor in this crate, but the trait is
/// independent of it so a second observer (e.g. a test harness) can be
/// plugged in without touching the engine.
pub trait EventHook {
    fn on_new_process(&mut self, _image: &Path, _entry: u64, _symbols_loaded: bool) {}
    fn on_loaded_dll(&mut self, _image: &Path, _base: u64, _symbols_loaded: bool) {}

    /// Called once execution is about to start, with a handle that can arm
    /// breakpoints. A hard error here (e.g. a failed memory write while
    /// installing a trap) aborts the run; returning `Ok(())` is the default.
    fn on_execution_started(
        &mut self,
        _symbols: &SymbolIndex,
        _engine: &mut ArmingHandle,
    ) -> Result<()> {
        Ok(())
    }

    fn on_break_point(&mut self, _bp: &BreakPointInfo) {}
    fn on_step(&mut self) {}
    fn on_exit_process(&mut self, _code: i32) {}
}

/// A no-op observer, for callers that only want to drive the debuggee.
#[derive(Default)]
pub struct DoNothingHook;
impl EventHook for DoNothingHook {}

/// Handed to `on_execution_started` so the ledger can arm breakpoints
/// without reaching back into private engine state.
pub struct ArmingHandle<'a> {
    breakpoints: &'a mut BreakpointTable,
    symbols: &'a SymbolIndex,
    pid: Pid,
}

impl<'a> ArmingHandle<'a> {
    /// Arm a breakpoint at the smallest breakable line `>= line` in `file`.
    /// Returns the address armed, or `None` if no breakable line exists
    /// (SPEC_FULL.md §4.D, "Arming lines").
    pub fn append_break_point(&mut self, file: &Path, line: u64) -> Result<Option<u64>> {
        let Some(source) = self.symbols.find_by_suffix(&file.to_string_lossy()) else {
            return Ok(None);
        };
        let Some(source_line) = source.find_breakable_line(line) else {
            return Ok(None);
        };
        let addr = source_line.address;
        if !self.breakpoints.contains(addr) {
            self.breakpoints.install(
                self.pid,
                addr,
                BreakpointOrigin {
                    file: source.source.clone(),
                    line: source_line.line,
                },
            )?;
        }
        Ok(Some(addr))
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
enum State {
    StoppedAtEntry,
    Running,
    Exited,
}

/// Drives one debuggee from launch to exit.
pub struct Engine {
    pid: Pid,
    symbols: SymbolIndex,
    breakpoints: BreakpointTable,
    state: State,
    /// Set when an event was consumed but the debuggee has not yet been told
    /// to continue (SPEC_FULL.md §4.D, "Continue discipline").
    pending_continue: bool,
}

impl Engine {
    /// Drive the freshly-seized child to its entry point and load symbols
    /// for its main image. Returns with the engine in `StoppedAtEntry`;
    /// call `resume` to run the debuggee to completion.
    pub fn start(child: Child<Installed>, hooks: &mut dyn EventHook) -> Result<Engine> {
        let pid = child.pid();
        event::continue_event(pid, ContinueStatus::Continue)?;

        loop {
            match event::wait_event(pid)? {
                Event::CreateProcess { image_file, .. } => {
                    let (entry, symbols) = match load_image(&image_file)? {
                        Some(img) => (img.entry, img.symbols),
                        None => (0, SymbolIndex::new()),
                    };
                    hooks.on_new_process(&image_file, entry, !symbols.files().is_empty());

                    return Ok(Engine {
                        pid,
                        symbols,
                        breakpoints: BreakpointTable::new(),
                        state: State::StoppedAtEntry,
                        pending_continue: true,
                    });
                }
                Event::ExitProcess { .. } => {
                    return Err(Error::ExitedBeforeEntry);
                }
                _ => continue,
            }
        }
    }

    /// The symbol index populated from the main image, valid once `start`
    /// has returned.
    pub fn symbols(&self) -> &SymbolIndex {
        &self.symbols
    }

    /// Whether the debuggee has exited. `resume`/`poll_run_one` are
    /// idempotent no-ops once this is true.
    pub fn is_exited(&self) -> bool {
        self.state == State::Exited
    }

    /// Arm a breakpoint at the smallest breakable line `>= line` in `file`.
    pub fn append_break_point(&mut self, file: &Path, line: u64) -> Result<Option<u64>> {
        ArmingHandle {
            breakpoints: &mut self.breakpoints,
            symbols: &self.symbols,
            pid: self.pid,
        }
        .append_break_point(file, line)
    }

    /// Notify observers that execution is about to start and let them arm
    /// their breakpoints, then drive the debuggee to completion.
    pub fn run(&mut self, hooks: &mut dyn EventHook) -> Result<()> {
        self.start_execution(hooks)?;
        self.resume(hooks)
    }

    /// Arm breakpoints via `EventHook::on_execution_started` and transition
    /// to `Running`, without driving the event loop. Split out of `run` so
    /// callers that want non-blocking control (`poll_run_one`) can arm once
    /// and then pump the loop themselves.
    pub fn start_execution(&mut self, hooks: &mut dyn EventHook) -> Result<()> {
        debug_assert_eq!(self.state, State::StoppedAtEntry);
        let mut handle = ArmingHandle {
            breakpoints: &mut self.breakpoints,
            symbols: &self.symbols,
            pid: self.pid,
        };
        hooks.on_execution_started(&self.symbols, &mut handle)?;
        self.state = State::Running;
        Ok(())
    }

    /// Drive the event loop until the debuggee exits. Idempotent once the
    /// engine has reached `Exited`.
    pub fn resume(&mut self, hooks: &mut dyn EventHook) -> Result<()> {
        if self.state == State::Exited {
            return Ok(());
        }

        loop {
            if self.pending_continue {
                event::continue_event(self.pid, ContinueStatus::Continue)?;
                self.pending_continue = false;
            }

            let ev = event::wait_event(self.pid)?;
            self.dispatch(ev, hooks)?;
            if self.state == State::Exited {
                return Ok(());
            }
        }
    }

    /// Non-blocking single step of the event loop: services at most one
    /// pending debug event and returns `Ok(false)` immediately if none is
    /// ready, instead of blocking in `waitpid` like `resume` does. Used by
    /// the integration-test harness to avoid hanging on a misbehaving
    /// fixture. Idempotent once the engine has reached `Exited`.
    pub fn poll_run_one(&mut self, hooks: &mut dyn EventHook) -> Result<bool> {
        if self.state == State::Exited {
            return Ok(false);
        }

        if self.pending_continue {
            event::continue_event(self.pid, ContinueStatus::Continue)?;
            self.pending_continue = false;
        }

        match event::poll_event(self.pid)? {
            None => Ok(false),
            Some(ev) => {
                self.dispatch(ev, hooks)?;
                Ok(true)
            }
        }
    }

    fn dispatch(&mut self, event: Event, hooks: &mut dyn EventHook) -> Result<()> {
        match event {
            Event::CreateProcess { image_file, .. } | Event::LoadImage { image_file, .. } => {
                let loaded = load_image(&image_file)?;
                let symbols_loaded = loaded.is_some();
                if let Some(img) = loaded {
                    merge_symbols(&mut self.symbols, img.symbols);
                }
                hooks.on_loaded_dll(&image_file, 0, symbols_loaded);
                self.pending_continue = true;
            }
            Event::Breakpoint { addr, pid } => {
                if self.breakpoints.contains(addr) {
                    let origin = self.breakpoints.service(pid, addr)?;
                    let exited = event::single_step(pid)?;
                    hooks.on_break_point(&BreakPointInfo {
                        file: origin.file,
                        line: origin.line,
                        addr,
                    });
                    match exited {
                        None => {
                            self.breakpoints.rearm(pid, addr)?;
                            self.pending_continue = true;
                        }
                        Some(code) => {
                            hooks.on_exit_process(code);
                            self.state = State::Exited;
                        }
                    }
                } else {
                    self.pending_continue = true;
                }
            }
            Event::SingleStep { .. } => {
                hooks.on_step();
                self.pending_continue = true;
            }
            Event::ExitProcess { code } => {
                hooks.on_exit_process(code);
                self.state = State::Exited;
            }
            Event::Other => {
                self.pending_continue = true;
            }
        }
        Ok(())
    }
}

impl Drop for Engine {
    /// If the engine is dropped before the debuggee reported its own exit
    /// (e.g. an error aborts the run mid-session), kill the tracee rather
    /// than leaving it running untraced.
    fn drop(&mut self) {
        if self.state != State::Exited {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
        }
    }
}

fn load_image(path: &Path) -> Result<Option<symbols::LoadedImage>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(symbols::load(path)?))
}

fn merge_symbols(into: &mut SymbolIndex, from: SymbolIndex) {
    for file in from.files() {
        into.adopt(file.clone());
    }
}
