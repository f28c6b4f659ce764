//! Spawns a debuggee and seizes it with `ptrace`, stopped before its entry point.

use crate::error::{Error, Result};
use nix::sys;
use nix::sys::ptrace::Options;
use nix::sys::signal::SIGSTOP;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};
use os_pipe::PipeWriter;
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Process state.
pub trait State {}

/// Not yet forked.
pub struct Template;
impl State for Template {}

/// Forked, stopped, and seized by the tracer.
pub struct Installed;
impl State for Installed {}

/// A debuggee process, tracked through its spawn lifecycle.
pub struct Child<S: State> {
    pub program: String,
    args: Vec<String>,
    stdout: PipeWriter,
    stderr: PipeWriter,
    pid: Option<Pid>,
    _state: PhantomData<S>,
}

impl Child<Template> {
    /// Describe a debuggee to be spawned, without starting it.
    pub fn new<ARGS, I>(
        program: impl Into<String>,
        args: ARGS,
        stdout: PipeWriter,
        stderr: PipeWriter,
    ) -> Child<Template>
    where
        ARGS: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdout,
            stderr,
            pid: None,
            _state: PhantomData,
        }
    }

    /// Fork, stop the child with `SIGSTOP`, `exec()` the debuggee and `PTRACE_SEIZE` it.
    ///
    /// On return the debuggee is stopped, seized, but has not yet executed its
    /// loader entry point: the first `wait_event` will report `PTRACE_EVENT_EXEC`.
    pub fn install(&self) -> Result<Child<Installed>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(self.stdout.try_clone().map_err(Error::Spawn)?)
            .stderr(self.stderr.try_clone().map_err(Error::Spawn)?);

        unsafe {
            cmd.pre_exec(|| {
                // Disable ASLR so repeated runs produce repeatable addresses, which
                // makes coverage runs reproducible across invocations of the same binary.
                sys::personality::set(sys::personality::Persona::ADDR_NO_RANDOMIZE)?;
                Ok(())
            });
        }

        match unsafe { fork() }.map_err(Error::Ptrace)? {
            ForkResult::Parent { child: pid } => {
                waitpid(pid, Some(WaitPidFlag::WSTOPPED)).map_err(Error::Waitpid)?;
                sys::ptrace::seize(
                    pid,
                    Options::PTRACE_O_TRACEEXEC | Options::PTRACE_O_TRACEEXIT,
                )
                .map_err(Error::Ptrace)?;

                Ok(Child {
                    program: self.program.clone(),
                    args: self.args.clone(),
                    stdout: self.stdout.try_clone().map_err(Error::Spawn)?,
                    stderr: self.stderr.try_clone().map_err(Error::Spawn)?,
                    pid: Some(pid),
                    _state: PhantomData,
                })
            }
            ForkResult::Child => {
                sys::signal::raise(SIGSTOP).expect("raise(SIGSTOP) in debuggee child");
                let err = cmd.exec();
                // exec() only returns on failure; there is no parent left to report to.
                panic!("exec of debugee {} failed: {err}", self.program);
            }
        }
    }
}

impl Child<Installed> {
    pub fn pid(&self) -> Pid {
        self.pid.expect("installed child always has a pid")
    }
}
