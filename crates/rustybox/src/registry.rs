//! Applet registry and execution.
//!
//! The registry maps command names to their native implementation and,
//! where one exists, to a BusyBox applet main reachable through the FFI
//! bridge. [`AppletRegistry::execute`] picks the preferred implementation,
//! falls back to native when BusyBox cannot serve the call, and turns applet
//! errors into an exit status plus an `APPLET: message` line on stderr.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use busybox_ffi_bridge::{run_applet, BusyBoxApplet, CommandProvider, FfiError};
use rustybox_common::{AppletFn, Streams, EXIT_FAILURE, EXIT_NOT_FOUND};
use tracing::{debug, warn};

use crate::applets::NATIVE_APPLETS;
use crate::config::Implementation;

/// Name used for messages that do not come from a specific applet.
pub const PROGRAM_NAME: &str = "rustybox";

/// Returns the command name for an argv[0]: its final path component.
pub fn command_name(argv0: &str) -> &str {
    Path::new(argv0)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(argv0)
}

/// Registry of every command rustybox can run.
#[derive(Clone)]
pub struct AppletRegistry {
    preferred: Implementation,
    native: BTreeMap<&'static str, AppletFn>,
    busybox: BTreeMap<&'static str, BusyBoxApplet>,
}

impl fmt::Debug for AppletRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppletRegistry")
            .field("preferred", &self.preferred)
            .field("native", &self.native.keys().collect::<Vec<_>>())
            .field("busybox", &self.busybox)
            .finish()
    }
}

impl Default for AppletRegistry {
    fn default() -> Self {
        Self::new(Implementation::default())
    }
}

impl AppletRegistry {
    /// Creates a registry with every native applet and the BusyBox-backed
    /// applets (everything the bridge exposes except the shell).
    pub fn new(preferred: Implementation) -> Self {
        let native = NATIVE_APPLETS.iter().copied().collect();
        let busybox = BusyBoxApplet::all()
            .iter()
            .filter(|applet| **applet != BusyBoxApplet::Ash)
            .map(|applet| (applet.name(), *applet))
            .collect();

        debug!(preferred = %preferred, "Created applet registry");
        Self {
            preferred,
            native,
            busybox,
        }
    }

    /// Returns the preferred implementation.
    pub fn preferred(&self) -> Implementation {
        self.preferred
    }

    /// Changes the preferred implementation.
    pub fn set_preferred(&mut self, preferred: Implementation) {
        self.preferred = preferred;
    }

    /// Returns true if `name` can be executed.
    pub fn has_command(&self, name: &str) -> bool {
        self.native.contains_key(name) || self.busybox.contains_key(name)
    }

    /// Returns true if `name` has a BusyBox-backed implementation.
    pub fn has_busybox(&self, name: &str) -> bool {
        self.busybox.contains_key(name)
    }

    /// Returns every command name, sorted and unique.
    pub fn list_commands(&self) -> Vec<String> {
        self.native
            .keys()
            .chain(self.busybox.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Returns which implementation would run `name`, if any.
    ///
    /// BusyBox is chosen only when preferred, available for this command
    /// and linked into the binary.
    pub fn resolve(&self, name: &str) -> Option<Implementation> {
        self.resolve_as(self.preferred, name)
    }

    fn resolve_as(&self, preferred: Implementation, name: &str) -> Option<Implementation> {
        let busybox_ready = self.busybox.contains_key(name) && busybox_ffi_bridge::is_linked();
        match preferred {
            Implementation::BusyBox if busybox_ready => Some(Implementation::BusyBox),
            _ if self.native.contains_key(name) => Some(Implementation::Native),
            _ if busybox_ready => Some(Implementation::BusyBox),
            _ => None,
        }
    }

    /// Multi-line summary for `--help`-style output.
    pub fn describe(&self) -> String {
        let commands = self.list_commands();
        let mut out = format!(
            "{} {}: multi-call binary\n\nPreferred implementation: {}\nBusyBox bridge: {}\n\nCurrently defined functions ({}):\n",
            PROGRAM_NAME,
            env!("CARGO_PKG_VERSION"),
            self.preferred,
            if busybox_ffi_bridge::is_linked() { "linked" } else { "not linked" },
            commands.len()
        );

        // Wrap the command list at 78 columns, comma separated.
        let mut line = String::from("\t");
        for (i, name) in commands.iter().enumerate() {
            let piece = if i + 1 < commands.len() {
                format!("{}, ", name)
            } else {
                name.clone()
            };
            if line.len() + piece.len() > 78 && line.len() > 1 {
                out.push_str(line.trim_end());
                out.push('\n');
                line = String::from("\t");
            }
            line.push_str(&piece);
        }
        out.push_str(&line);
        out.push('\n');
        out
    }

    /// Runs `command` with `args` (argv, `args[0]` included) against `io`.
    ///
    /// Never fails: every outcome is an exit status.
    pub fn execute(&self, command: &str, args: &[String], io: &mut Streams<'_>) -> i32 {
        self.execute_as(self.preferred, command, args, io)
    }

    /// Like [`execute`](Self::execute) with an explicit preference.
    pub fn execute_as(
        &self,
        preferred: Implementation,
        command: &str,
        args: &[String],
        io: &mut Streams<'_>,
    ) -> i32 {
        if preferred == Implementation::BusyBox && !self.busybox.contains_key(command) {
            if self.native.contains_key(command) {
                warn!(command = %command, "No BusyBox implementation, using native");
            }
        } else if preferred == Implementation::BusyBox && !busybox_ffi_bridge::is_linked() {
            warn!(command = %command, "BusyBox bridge not linked, using native");
        }

        match self.resolve_as(preferred, command) {
            Some(Implementation::BusyBox) => self.run_busybox(command, args, io),
            Some(Implementation::Native) => self.run_native(command, args, io),
            None => {
                io.warn(PROGRAM_NAME, format_args!("{}: command not found", command));
                EXIT_NOT_FOUND
            }
        }
    }

    fn run_native(&self, command: &str, args: &[String], io: &mut Streams<'_>) -> i32 {
        let Some(main) = self.native.get(command) else {
            return EXIT_NOT_FOUND;
        };
        debug!(command = %command, argc = args.len(), "Running native applet");

        let result = main(args, io).and_then(|code| {
            io.stdout.flush()?;
            Ok(code)
        });
        match result {
            Ok(code) => code,
            Err(e) if e.is_broken_pipe() => EXIT_FAILURE,
            Err(e) => {
                io.warn(command, &e);
                e.exit_code()
            }
        }
    }

    fn run_busybox(&self, command: &str, args: &[String], io: &mut Streams<'_>) -> i32 {
        let Some(applet) = self.busybox.get(command).copied() else {
            return EXIT_NOT_FOUND;
        };
        debug!(command = %command, argc = args.len(), "Running BusyBox applet");

        // BusyBox writes to the process stdout directly; keep ordering sane.
        if io.stdout.flush().is_err() {
            return EXIT_FAILURE;
        }
        match run_applet(applet, args) {
            Ok(code) => code,
            Err(FfiError::NotLinked) => self.run_native(command, args, io),
            Err(e) => {
                io.warn(command, &e);
                EXIT_FAILURE
            }
        }
    }

    /// Runs a command against the process's standard streams.
    pub fn execute_stdio(&self, command: &str, args: &[String]) -> i32 {
        self.execute_stdio_as(self.preferred, command, args)
    }

    fn execute_stdio_as(&self, preferred: Implementation, command: &str, args: &[String]) -> i32 {
        let stdin = io::stdin();
        let mut stdin = stdin.lock();
        let mut stdout = BufWriter::new(io::stdout().lock());
        let mut stderr = io::stderr().lock();

        let mut streams = Streams::new(&mut stdin, &mut stdout, &mut stderr);
        let code = self.execute_as(preferred, command, args, &mut streams);
        match stdout.flush() {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                let _ = writeln!(stderr, "{}: {}", command, rustybox_common::io_message(&e));
                EXIT_FAILURE
            }
            _ => code,
        }
    }
}

/// Callbacks for a patched ash: commands always run natively, since the
/// calling ash already holds the BusyBox bridge.
impl CommandProvider for AppletRegistry {
    fn has_command(&self, name: &str) -> bool {
        self.native.contains_key(name)
    }

    fn dispatch(&self, args: &[String]) -> i32 {
        let Some(argv0) = args.first() else {
            return EXIT_NOT_FOUND;
        };
        let name = command_name(argv0).to_string();
        self.execute_stdio_as(Implementation::Native, &name, args)
    }

    fn list_commands(&self) -> Vec<String> {
        self.native.keys().map(|k| k.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn run(registry: &AppletRegistry, args: &[&str]) -> (i32, String, String) {
        let args = argv(args);
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut io = Streams::new(&mut input, &mut out, &mut err);
        let code = registry.execute(&args[0], &args, &mut io);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("/usr/bin/echo"), "echo");
        assert_eq!(command_name("echo"), "echo");
    }

    #[test]
    fn test_list_commands_sorted_unique() {
        let registry = AppletRegistry::default();
        let commands = registry.list_commands();
        let mut sorted = commands.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(commands, sorted);
        assert!(commands.contains(&"echo".to_string()));
        assert!(!commands.contains(&"ash".to_string()));
    }

    #[test]
    fn test_execute_native() {
        let registry = AppletRegistry::default();
        assert_eq!(run(&registry, &["echo", "hi"]), (0, "hi\n".into(), "".into()));
        assert_eq!(run(&registry, &["false"]).0, 1);
    }

    #[test]
    fn test_execute_unknown_command() {
        let registry = AppletRegistry::default();
        let (code, out, err) = run(&registry, &["frobnicate"]);
        assert_eq!(code, 127);
        assert_eq!(out, "");
        assert_eq!(err, "rustybox: frobnicate: command not found\n");
    }

    #[test]
    fn test_execute_reports_applet_errors() {
        let registry = AppletRegistry::default();
        let (code, _, err) = run(&registry, &["head", "-z"]);
        assert_eq!(code, 1);
        assert_eq!(err, "head: invalid option -- 'z'\n");

        let (code, _, err) = run(&registry, &["[", "x"]);
        assert_eq!(code, 2);
        assert_eq!(err, "[: missing ]\n");
    }

    #[cfg(not(feature = "busybox"))]
    #[test]
    fn test_busybox_preference_falls_back_to_native() {
        let registry = AppletRegistry::new(Implementation::BusyBox);
        assert_eq!(registry.resolve("echo"), Some(Implementation::Native));
        assert_eq!(run(&registry, &["echo", "x"]), (0, "x\n".into(), "".into()));
        assert_eq!(registry.resolve("nope"), None);
    }

    #[test]
    fn test_provider_view_is_native_only() {
        let registry = AppletRegistry::new(Implementation::BusyBox);
        let provider: &dyn CommandProvider = &registry;
        assert!(provider.has_command("grep"));
        assert!(!provider.has_command("ash"));
        assert_eq!(provider.list_commands().len(), NATIVE_APPLETS.len());
    }

    #[test]
    fn test_describe_lists_commands() {
        let text = AppletRegistry::default().describe();
        assert!(text.starts_with("rustybox "));
        assert!(text.contains("Preferred implementation: native"));
        assert!(text.contains("echo, "));
    }
}
