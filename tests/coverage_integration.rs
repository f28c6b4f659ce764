//! Drives a real `cc`-compiled debuggee under `ptrace` end to end. Requires a
//! C toolchain and Linux/x86_64; gated behind the `int_test` feature since it
//! spawns real processes rather than testing pure logic.

#![cfg(all(target_os = "linux", target_arch = "x86_64", feature = "int_test"))]

mod common;

use ccov::coverage::{Ledger, CoverageObserver};
use ccov::engine::process::Child;
use ccov::engine::Engine;
use serial_test::serial;
use std::path::{Path, PathBuf};

const SINGLE_HIT_SRC: &str = r#"
#include <stdio.h>

int compute(int x) {
    int y = x * 2;
    return y;
}

int main() {
    int r = compute(21);
    printf("%d\n", r);
    return 0;
}
"#;

const LOOP_SRC: &str = r#"
#include <stdio.h>

int add(int a, int b) {
    int c = a + b;
    return c;
}

int main() {
    int total = 0;
    for (int i = 0; i < 5; i++) {
        total = add(total, i);
    }
    printf("%d\n", total);
    return 0;
}
"#;

fn run_coverage(bin: &Path, project_root: &Path, files: &[PathBuf]) -> Ledger {
    let (_reader_out, writer_out) = os_pipe::pipe().unwrap();
    let (_reader_err, writer_err) = os_pipe::pipe().unwrap();

    let child = Child::new(
        bin.to_string_lossy().into_owned(),
        Vec::<String>::new(),
        writer_out,
        writer_err,
    )
    .install()
    .unwrap();

    let mut observer = CoverageObserver::new(project_root, files);
    let mut engine = Engine::start(child, &mut observer).unwrap();
    engine.run(&mut observer).unwrap();
    observer.into_ledger()
}

#[test]
#[serial]
fn single_execution_counts_one_hit() {
    let (dir, bin) = common::compile_fixture(SINGLE_HIT_SRC, "single_hit");
    let src_path = dir.path().join("single_hit.c");

    let ledger = run_coverage(&bin, dir.path(), &[src_path]);

    assert_eq!(ledger.files.len(), 1);
    let file = &ledger.files[0];
    assert_eq!(file.total_relevant_lines, 1);
    assert_eq!(file.relevant_lines_hit, 1);
    assert_eq!(file.total_hits, 1);
    assert_eq!(file.coverage, 100.0);

    let line = file
        .lines
        .iter()
        .find(|l| l.is_relevant)
        .expect("a relevant line was recorded");
    assert_eq!(line.hits, 1);
}

#[test]
#[serial]
fn looped_line_accumulates_hits_without_double_counting_coverage() {
    let (dir, bin) = common::compile_fixture(LOOP_SRC, "looped");
    let src_path = dir.path().join("looped.c");

    let ledger = run_coverage(&bin, dir.path(), &[src_path]);

    let file = &ledger.files[0];
    assert_eq!(file.total_relevant_lines, 1);
    assert_eq!(file.relevant_lines_hit, 1);
    assert_eq!(file.total_hits, 5);
    assert_eq!(file.coverage, 100.0);
    assert_eq!(file.average_hits_per_line, 5.0);
}

#[test]
#[serial]
fn poll_run_one_drives_the_debuggee_without_blocking_resume() {
    let (dir, bin) = common::compile_fixture(SINGLE_HIT_SRC, "single_hit_poll");
    let src_path = dir.path().join("single_hit_poll.c");

    let (_reader_out, writer_out) = os_pipe::pipe().unwrap();
    let (_reader_err, writer_err) = os_pipe::pipe().unwrap();

    let child = Child::new(
        bin.to_string_lossy().into_owned(),
        Vec::<String>::new(),
        writer_out,
        writer_err,
    )
    .install()
    .unwrap();

    let mut observer = CoverageObserver::new(dir.path(), &[src_path]);
    let mut engine = Engine::start(child, &mut observer).unwrap();
    engine.start_execution(&mut observer).unwrap();

    // Drain the event stream one non-blocking poll at a time instead of the
    // blocking `resume` loop; a misbehaving fixture that never produces an
    // event would spin here rather than hang the test.
    let mut polls = 0;
    while !engine.is_exited() {
        engine.poll_run_one(&mut observer).unwrap();
        polls += 1;
        assert!(polls < 10_000_000, "debuggee never reached exit");
    }

    let ledger = observer.into_ledger();
    let file = &ledger.files[0];
    assert_eq!(file.relevant_lines_hit, 1);
    assert_eq!(file.total_hits, 1);
}

#[test]
#[serial]
fn file_with_no_debug_info_reports_zero_coverage() {
    let (dir, bin) = common::compile_fixture(SINGLE_HIT_SRC, "single_hit");
    let unrelated = dir.path().join("never_loaded.c");
    std::fs::write(&unrelated, "int main() { return 0; }\n").unwrap();

    let ledger = run_coverage(&bin, dir.path(), &[unrelated]);

    let file = &ledger.files[0];
    assert_eq!(file.total_lines, 0);
    assert_eq!(file.total_relevant_lines, 0);
    assert_eq!(file.coverage, 0.0);
}
