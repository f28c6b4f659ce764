fn main() {
    if !(cfg!(target_os = "linux") && cfg!(target_arch = "x86_64")) {
        panic!(
            "{} only supports ptrace-based tracing on linux/x86_64",
            env!("CARGO_PKG_NAME")
        );
    }
}
