//! Logging setup.
//!
//! Messages are tagged with `target: "<subsystem>"` (`coverage`, `report`)
//! so `RUST_LOG=coverage=debug` can isolate one layer without drowning in
//! the others.

/// Initialize the global logger from `RUST_LOG`, defaulting to `info`.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
