//! Multi-call dispatch on argv[0].

use crate::registry::{command_name, PROGRAM_NAME};

/// Shell names that start shell mode when rustybox is invoked through them.
pub const SHELL_NAMES: &[&str] = &["sh", "ash", "bash"];

/// What the process was invoked as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// A shell symlink (`sh`, `ash`, `bash`); a leading `-` marks a login
    /// shell.
    Shell {
        /// The shell name without the login dash.
        name: String,
        /// Started as a login shell.
        login: bool,
    },
    /// The `rustybox` binary itself (or a `rustybox-*` copy).
    Launcher,
    /// Any other name: run that applet.
    Applet(String),
}

impl Invocation {
    /// Classifies an argv[0] by its final path component.
    pub fn from_argv0(argv0: &str) -> Self {
        let base = command_name(argv0);
        let (login, bare) = match base.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, base),
        };

        if SHELL_NAMES.contains(&bare) {
            return Invocation::Shell {
                name: bare.to_string(),
                login,
            };
        }
        if bare == PROGRAM_NAME || bare.starts_with("rustybox-") || base.is_empty() {
            return Invocation::Launcher;
        }
        Invocation::Applet(base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shells() {
        assert_eq!(
            Invocation::from_argv0("/bin/sh"),
            Invocation::Shell {
                name: "sh".into(),
                login: false
            }
        );
        assert_eq!(
            Invocation::from_argv0("-ash"),
            Invocation::Shell {
                name: "ash".into(),
                login: true
            }
        );
        assert_eq!(
            Invocation::from_argv0("-bash"),
            Invocation::Shell {
                name: "bash".into(),
                login: true
            }
        );
    }

    #[test]
    fn test_launcher() {
        assert_eq!(Invocation::from_argv0("rustybox"), Invocation::Launcher);
        assert_eq!(
            Invocation::from_argv0("./target/debug/rustybox"),
            Invocation::Launcher
        );
        assert_eq!(Invocation::from_argv0("rustybox-static"), Invocation::Launcher);
        assert_eq!(Invocation::from_argv0(""), Invocation::Launcher);
    }

    #[test]
    fn test_applets() {
        assert_eq!(
            Invocation::from_argv0("/usr/local/bin/echo"),
            Invocation::Applet("echo".into())
        );
        assert_eq!(Invocation::from_argv0("["), Invocation::Applet("[".into()));
        assert_eq!(
            Invocation::from_argv0("-echo"),
            Invocation::Applet("-echo".into())
        );
    }
}
