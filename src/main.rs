use ccov::coverage::{config, report, CoverageObserver};
use ccov::engine::process::Child;
use ccov::engine::Engine;
use ccov::log as ccov_log;
use clap::Parser;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

/// Launch a debuggee under coverage instrumentation and report which source
/// lines executed.
#[derive(Parser, Debug)]
#[command(name = "ccov", version, about)]
struct Args {
    /// Executable to run under coverage.
    debuggee: PathBuf,

    /// Arguments forwarded to the debuggee.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    debuggee_args: Vec<String>,

    /// Project root and list of interesting source files.
    #[arg(long, default_value = "ccov-files.txt")]
    config: PathBuf,

    /// HTML template to substitute the coverage report into.
    #[arg(long, default_value = "coverage/index.template.html")]
    template: PathBuf,

    /// Directory for `ccov-info.json` and `coverage/index.html`.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() {
    ccov_log::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        log::error!(target: "coverage", "{e:#}");
        std::process::exit(1);
    }
}

/// Top-level error type is `anyhow::Error`: every lower layer (`engine`,
/// `coverage`) returns its own `thiserror` enum, and this boundary is the
/// only place they need to merge into one reportable error.
fn run(args: Args) -> anyhow::Result<()> {
    let cfg = config::load(&args.config)?;
    log::info!(
        target: "coverage",
        "loaded {} interesting file(s) under {}",
        cfg.files.len(),
        cfg.project_root.display()
    );

    let (stdout_reader, stdout_writer) = os_pipe::pipe()?;
    let (stderr_reader, stderr_writer) = os_pipe::pipe()?;

    // fork() happens inside install(); keep this process single-threaded
    // until it returns so the forked child never has to worry about a
    // background thread holding a libc lock across the fork.
    let child = Child::new(
        args.debuggee.to_string_lossy().into_owned(),
        args.debuggee_args,
        stdout_writer,
        stderr_writer,
    )
    .install()?;

    forward(stdout_reader, io::stdout());
    forward(stderr_reader, io::stderr());

    let mut observer = CoverageObserver::new(&cfg.project_root, &cfg.files);
    let mut engine = Engine::start(child, &mut observer)?;
    engine.run(&mut observer)?;

    let ledger = observer.into_ledger();
    let json_path = args.out_dir.join("ccov-info.json");
    report::write_json(&ledger, &json_path)?;
    report::write_html(&ledger, &args.template, &args.out_dir.join("coverage/index.html"))?;

    log::info!(target: "coverage", "coverage report written to {}", json_path.display());
    Ok(())
}

/// Copy a debuggee's inherited stdio stream to ours on a background thread
/// so the pipe never backs up and blocks the tracee.
fn forward(mut reader: os_pipe::PipeReader, mut sink: impl io::Write + Send + 'static) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sink.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
