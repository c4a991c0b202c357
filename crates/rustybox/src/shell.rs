//! Interactive front ends: shell mode, the mini shell, the launcher prompt
//! and the benchmark runner.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use busybox_ffi_bridge::{
    register_command_provider, run_applet, unregister_command_provider, BusyBoxApplet, FfiError,
};
use rustybox_common::shell::{run_external, split_words};
use rustybox_common::{AppletError, Streams, EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_SYNTAX};
use tracing::{debug, info, warn};

use crate::config::Implementation;
use crate::registry::{AppletRegistry, PROGRAM_NAME};

/// Prompt printed by the mini shell.
pub const MINI_SHELL_PROMPT: &str = "λ> ";

/// Prompt printed by the interactive launcher.
pub const LAUNCHER_PROMPT: &str = "rustybox> ";

// =============================================================================
// Shell mode
// =============================================================================

/// Runs BusyBox ash with rustybox commands available as built-ins.
///
/// `args` is the full argv; argv[0] keeps the login dash if there was one.
/// Without the bridge linked the mini shell takes over.
pub fn run_shell_mode(name: &str, login: bool, args: &[String]) -> i32 {
    let mut argv = args.to_vec();
    let argv0 = if login {
        format!("-{}", name)
    } else {
        name.to_string()
    };
    match argv.first_mut() {
        Some(first) => *first = argv0,
        None => argv.push(argv0),
    }

    register_command_provider(Box::new(AppletRegistry::new(Implementation::Native)));
    info!(shell = %name, login, "Starting ash with rustybox built-ins");
    let result = run_applet(BusyBoxApplet::Ash, &argv);
    unregister_command_provider();

    match result {
        Ok(code) => code,
        Err(FfiError::NotLinked) => {
            warn!("BusyBox ash is not linked, falling back to the mini shell");
            let registry = AppletRegistry::new(Implementation::Native);
            MiniShell::new(&registry).run_stdio()
        }
        Err(e) => {
            eprintln!("{}: {}", name, e);
            EXIT_FAILURE
        }
    }
}

// =============================================================================
// Mini shell
// =============================================================================

/// A small REPL: quoted word splitting, a few built-ins, rustybox commands
/// in-process and everything else as external programs.
pub struct MiniShell<'r> {
    registry: &'r AppletRegistry,
    prompt: bool,
    last_status: i32,
}

impl<'r> MiniShell<'r> {
    /// Creates a shell that prints prompts.
    pub fn new(registry: &'r AppletRegistry) -> Self {
        Self {
            registry,
            prompt: true,
            last_status: 0,
        }
    }

    /// Enables or disables the prompt (off for scripts piped in).
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    /// Runs against the process's standard streams.
    pub fn run_stdio(&mut self) -> i32 {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        let mut streams = Streams::new(&mut input, &mut stdout, &mut stderr);
        self.run(&mut streams)
    }

    /// Reads and executes lines from `io.stdin` until EOF or `exit`.
    /// Commands share the shell's streams.
    pub fn run(&mut self, io: &mut Streams<'_>) -> i32 {
        loop {
            if self.prompt {
                let _ = write!(io.stdout, "{}", MINI_SHELL_PROMPT);
                let _ = io.stdout.flush();
            }

            let mut line = String::new();
            match io.stdin.read_line(&mut line) {
                Ok(0) => {
                    if self.prompt {
                        let _ = writeln!(io.stdout);
                    }
                    return self.last_status;
                }
                Ok(_) => {}
                Err(e) => {
                    io.warn(PROGRAM_NAME, rustybox_common::io_message(&e));
                    return EXIT_FAILURE;
                }
            }

            let words = match split_words(&line) {
                Ok(words) => words,
                Err(e) => {
                    io.warn(PROGRAM_NAME, format_args!("syntax error: {}", e));
                    self.last_status = EXIT_SYNTAX;
                    continue;
                }
            };
            let Some(command) = words.first() else {
                continue;
            };

            match command.as_str() {
                "exit" | "quit" => {
                    return match words.get(1) {
                        Some(code) => code.parse().unwrap_or(EXIT_SYNTAX),
                        None => self.last_status,
                    };
                }
                "help" => {
                    self.print_help(io);
                    self.last_status = 0;
                    continue;
                }
                "cd" => {
                    self.last_status = change_directory(words.get(1).map(String::as_str), io);
                    continue;
                }
                _ => {}
            }

            let started = Instant::now();
            let code = self.run_command(&words, io);
            let elapsed = started.elapsed();
            self.last_status = code;
            if code != 0 {
                let _ = writeln!(
                    io.stdout,
                    "[exit code: {}, time: {:.2}µs]",
                    code,
                    elapsed.as_secs_f64() * 1e6
                );
            }
        }
    }

    fn run_command(&self, words: &[String], io: &mut Streams<'_>) -> i32 {
        let command = words[0].as_str();
        if self.registry.has_command(command) {
            return self.registry.execute(command, words, io);
        }

        debug!(command = %command, "Not a rustybox command, running externally");
        if io.stdout.flush().is_err() {
            return EXIT_FAILURE;
        }
        match run_external(words) {
            Ok(code) => code,
            Err(e @ AppletError::NotFound { .. }) => {
                io.warn(PROGRAM_NAME, &e);
                EXIT_NOT_FOUND
            }
            Err(e) => {
                io.warn(PROGRAM_NAME, &e);
                e.exit_code()
            }
        }
    }

    fn print_help(&self, io: &mut Streams<'_>) {
        let _ = writeln!(io.stdout, "Built-ins: cd [DIR], exit [N], quit, help");
        let _ = writeln!(
            io.stdout,
            "Commands: {}",
            self.registry.list_commands().join(" ")
        );
        let _ = writeln!(io.stdout, "Anything else runs as an external program.");
    }
}

/// The `cd` built-in. With no operand changes to `$HOME`.
fn change_directory(target: Option<&str>, io: &mut Streams<'_>) -> i32 {
    let target = match target {
        Some(dir) => PathBuf::from(dir),
        None => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home),
            None => {
                io.warn("cd", "HOME not set");
                return EXIT_FAILURE;
            }
        },
    };
    if let Err(e) = std::env::set_current_dir(&target) {
        io.warn("cd", AppletError::io(target.display().to_string(), e));
        return EXIT_FAILURE;
    }
    if let Ok(cwd) = std::env::current_dir() {
        std::env::set_var("PWD", cwd);
    }
    0
}

// =============================================================================
// Interactive launcher
// =============================================================================

/// The prompt shown when `rustybox` runs with no command.
pub fn run_launcher(registry: &AppletRegistry, io: &mut Streams<'_>) -> i32 {
    let _ = writeln!(
        io.stdout,
        "{} {} ({} commands). Type 'help' to list them, 'exit' to leave.",
        PROGRAM_NAME,
        env!("CARGO_PKG_VERSION"),
        registry.list_commands().len()
    );

    loop {
        let _ = write!(io.stdout, "{}", LAUNCHER_PROMPT);
        let _ = io.stdout.flush();

        let mut line = String::new();
        match io.stdin.read_line(&mut line) {
            Ok(0) => {
                let _ = writeln!(io.stdout);
                return 0;
            }
            Ok(_) => {}
            Err(_) => return EXIT_FAILURE,
        }

        let words = match split_words(&line) {
            Ok(words) => words,
            Err(e) => {
                io.warn(PROGRAM_NAME, &e);
                continue;
            }
        };
        let Some(command) = words.first() else {
            continue;
        };
        match command.as_str() {
            "exit" | "quit" => return 0,
            "help" => {
                let _ = write!(io.stdout, "{}", registry.describe());
                continue;
            }
            _ => {}
        }

        let code = registry.execute(command, &words, io);
        if code != 0 {
            let _ = writeln!(io.stdout, "(exit code: {})", code);
        }
    }
}

// =============================================================================
// Benchmark
// =============================================================================

/// Timing of repeated in-process runs of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    /// The command line benchmarked.
    pub command: String,
    /// Number of runs.
    pub iterations: u64,
    /// Wall time for all runs.
    pub total: Duration,
    /// Exit status of the final run.
    pub last_status: i32,
}

impl BenchmarkReport {
    /// Mean time per call in microseconds.
    pub fn per_call_micros(&self) -> f64 {
        self.total.as_secs_f64() * 1e6 / self.iterations as f64
    }

    /// Throughput in calls per second.
    pub fn calls_per_second(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        self.iterations as f64 / secs
    }
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Benchmark: {} ({} iterations)", self.command, self.iterations)?;
        writeln!(f, "  Total time: {:.3} ms", self.total.as_secs_f64() * 1e3)?;
        writeln!(f, "  Per call:   {:.3} µs", self.per_call_micros())?;
        write!(f, "  Calls/sec:  {:.0}", self.calls_per_second())
    }
}

/// Runs `args` `iterations` times in process with stdin empty and stdout
/// discarded. Applet diagnostics still reach `stderr`.
pub fn run_benchmark(
    registry: &AppletRegistry,
    iterations: u64,
    args: &[String],
    stderr: &mut dyn Write,
) -> anyhow::Result<BenchmarkReport> {
    anyhow::ensure!(iterations > 0, "iteration count must be a positive integer");
    let command = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("no command given to benchmark"))?;
    anyhow::ensure!(
        registry.has_command(command),
        "{}: command not found",
        command
    );

    let mut stdin = io::empty();
    let mut stdout = io::sink();
    let mut last_status = 0;
    let started = Instant::now();
    for _ in 0..iterations {
        let mut streams = Streams::new(&mut stdin, &mut stdout, &mut *stderr);
        last_status = registry.execute(command, args, &mut streams);
    }
    let total = started.elapsed();

    Ok(BenchmarkReport {
        command: rustybox_common::shell::join_command_line(args),
        iterations,
        total,
        last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn run_shell(script: &str, prompt: bool) -> (i32, String, String) {
        let registry = AppletRegistry::default();
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut io = Streams::new(&mut input, &mut out, &mut err);
        let code = MiniShell::new(&registry).with_prompt(prompt).run(&mut io);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_mini_shell_runs_applets() {
        let (code, out, err) = run_shell("echo 'hello  world'\nfalse\n", false);
        assert_eq!(code, 1);
        assert!(out.starts_with("hello  world\n[exit code: 1, time: "));
        assert!(out.ends_with("µs]\n"));
        assert_eq!(err, "");
    }

    #[test]
    fn test_mini_shell_prompt_and_exit() {
        let (code, out, _) = run_shell("exit 3\necho unreachable\n", true);
        assert_eq!(code, 3);
        assert_eq!(out, MINI_SHELL_PROMPT);
    }

    #[test]
    fn test_mini_shell_syntax_error() {
        let (code, _, err) = run_shell("echo 'open\n", false);
        assert_eq!(code, 2);
        assert_eq!(err, "rustybox: syntax error: unterminated quoted string\n");
    }

    #[test]
    fn test_mini_shell_external_not_found() {
        let (code, _, err) = run_shell("/definitely/not/a/program\n", false);
        assert_eq!(code, 127);
        assert!(err.contains("command not found"));
    }

    #[test]
    fn test_launcher() {
        let registry = AppletRegistry::default();
        let mut input = Cursor::new(b"echo hi\nfalse\nquit\n".to_vec());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut io = Streams::new(&mut input, &mut out, &mut err);
        assert_eq!(run_launcher(&registry, &mut io), 0);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("rustybox> hi\n"));
        assert!(out.contains("(exit code: 1)\n"));
    }

    #[test]
    fn test_benchmark() {
        let registry = AppletRegistry::default();
        let mut err = Vec::new();
        let args = vec!["echo".to_string(), "x".to_string()];
        let report = run_benchmark(&registry, 5, &args, &mut err).unwrap();
        assert_eq!(report.iterations, 5);
        assert_eq!(report.last_status, 0);
        assert_eq!(report.command, "echo x");
        assert!(report.to_string().contains("Calls/sec:"));

        assert!(run_benchmark(&registry, 0, &args, &mut err).is_err());
        let missing = vec!["nope".to_string()];
        assert!(run_benchmark(&registry, 1, &missing, &mut err).is_err());
    }
}
