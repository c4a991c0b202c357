//! rustybox: a multi-call binary that runs BusyBox-style applets as
//! in-process function calls.
//!
//! # Architecture
//!
//! ```text
//! argv[0] ──> Invocation ──┬─ Applet(name) ──> AppletRegistry::execute
//!                          ├─ Shell        ──> BusyBox ash (or MiniShell)
//!                          └─ Launcher     ──> clap flags / prompt
//!
//! AppletRegistry::execute ──┬─ native applet fn (this crate)
//!                           └─ BusyBox applet main (busybox-ffi-bridge)
//! ```
//!
//! Native applets live in [`applets`]; each is a plain function over argv
//! and a [`rustybox_common::Streams`] so the same code serves the command
//! line, the shells, the ash built-in hooks and the benchmark.

pub mod applets;
pub mod config;
pub mod dispatch;
pub mod install;
pub mod registry;
pub mod shell;

pub use config::{Config, ConfigError, Implementation};
pub use dispatch::Invocation;
pub use install::{install_links, InstallSummary};
pub use registry::AppletRegistry;
pub use shell::{run_benchmark, run_launcher, run_shell_mode, BenchmarkReport, MiniShell};
