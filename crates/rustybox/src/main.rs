//! rustybox entry point.
//!
//! Dispatches on argv[0]: an applet symlink runs that applet, a shell
//! symlink starts shell mode, and `rustybox` itself parses launcher flags.

use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rustybox::{
    install_links, run_benchmark, run_launcher, run_shell_mode, AppletRegistry, Config,
    Invocation, MiniShell,
};
use rustybox_common::Streams;

/// Multi-call binary running BusyBox-style applets in process
#[derive(Parser, Debug)]
#[command(name = "rustybox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Prefer the native Rust applets
    #[arg(long, conflicts_with = "use_busybox")]
    use_native: bool,

    /// Prefer BusyBox applet mains where the bridge provides them
    #[arg(long)]
    use_busybox: bool,

    /// List every available command
    #[arg(long)]
    list: bool,

    /// Create command symlinks in DIR (default: next to this binary)
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    install: Option<Option<PathBuf>>,

    /// Start the built-in mini shell
    #[arg(long)]
    nofork_shell: bool,

    /// Run COMMAND N times in process and report timings
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    benchmark: Option<u64>,

    /// Log filter (trace, debug, info, warn, error); overrides RUSTYBOX_LOG
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Command to run, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

/// Initialize tracing/logging on stderr.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
    if let Err(e) = result {
        eprintln!("rustybox: cannot initialise logging: {}", e);
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args_os()
        .map(|arg: OsString| arg.to_string_lossy().into_owned())
        .collect();
    let argv0 = argv.first().cloned().unwrap_or_default();

    let (config, rejected) = Config::from_env_lenient();
    if let Some(e) = rejected {
        eprintln!("rustybox: {}; using '{}'", e, config.implementation);
    }

    match Invocation::from_argv0(&argv0) {
        Invocation::Applet(name) => {
            init_logging(&config.log_filter);
            debug!(applet = %name, "Invoked as applet");
            let registry = AppletRegistry::new(config.implementation);
            exit_code(registry.execute_stdio(&name, &argv))
        }
        Invocation::Shell { name, login } => {
            init_logging(&config.log_filter);
            exit_code(run_shell_mode(&name, login, &argv))
        }
        Invocation::Launcher => run_launcher_cli(Cli::parse_from(&argv), config),
    }
}

fn run_launcher_cli(cli: Cli, config: Config) -> ExitCode {
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_filter));
    let config = config.with_flags(cli.use_native, cli.use_busybox);
    let registry = AppletRegistry::new(config.implementation);
    info!(implementation = %config.implementation, "rustybox launcher");

    if cli.list {
        let mut stdout = io::stdout().lock();
        for name in registry.list_commands() {
            if writeln!(stdout, "{}", name).is_err() {
                break;
            }
        }
        return ExitCode::SUCCESS;
    }

    if let Some(dir) = cli.install {
        return install(&registry, dir);
    }

    if cli.nofork_shell {
        let interactive = io::stdin().is_terminal();
        return exit_code(MiniShell::new(&registry).with_prompt(interactive).run_stdio());
    }

    if let Some(iterations) = cli.benchmark {
        if cli.command.is_empty() {
            eprintln!("rustybox: --benchmark needs a COMMAND");
            return ExitCode::from(2);
        }
        let mut stderr = io::stderr();
        return match run_benchmark(&registry, iterations, &cli.command, &mut stderr) {
            Ok(report) => {
                println!("{}", report);
                exit_code(report.last_status)
            }
            Err(e) => {
                eprintln!("rustybox: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    match cli.command.first() {
        Some(command) => exit_code(registry.execute_stdio(command, &cli.command)),
        None => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut stdout = io::stdout().lock();
            let mut stderr = io::stderr().lock();
            let mut streams = Streams::new(&mut input, &mut stdout, &mut stderr);
            exit_code(run_launcher(&registry, &mut streams))
        }
    }
}

fn install(registry: &AppletRegistry, dir: Option<PathBuf>) -> ExitCode {
    let binary = match std::env::current_exe() {
        Ok(binary) => binary,
        Err(e) => {
            error!("Cannot locate the rustybox binary: {}", e);
            eprintln!("rustybox: cannot locate own binary: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match install_links(registry, &binary, dir.as_deref()) {
        Ok(summary) => {
            for (name, reason) in &summary.failed {
                eprintln!("rustybox: {}: {}", name, reason);
            }
            println!(
                "Installed {} links in {} ({} failed)",
                summary.installed.len(),
                summary.dir.display(),
                summary.failed.len()
            );
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("rustybox: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
