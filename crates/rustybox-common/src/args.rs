//! Option parsing shared by the applets.
//!
//! A small getopt: single-dash clustered flags (`-rf`), option values either
//! attached (`-n5`) or separate (`-n 5`), `--` ends options, and a lone `-`
//! is an operand. By default options may follow operands, the way GNU and
//! BusyBox tools accept them; [`Getopt::stop_at_operand`] switches to strict
//! POSIX ordering for applets like `env` that pass the tail to a command.

use crate::error::{AppletError, AppletResult};

/// Parsed command line of one applet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    opts: Vec<(char, Option<String>)>,
    /// Non-option arguments, in order.
    pub operands: Vec<String>,
}

impl Options {
    /// Returns true if the flag was given at least once.
    pub fn has(&self, flag: char) -> bool {
        self.opts.iter().any(|(c, _)| *c == flag)
    }

    /// Returns how many times the flag was given.
    pub fn count(&self, flag: char) -> usize {
        self.opts.iter().filter(|(c, _)| *c == flag).count()
    }

    /// Returns the value of the last occurrence of an option.
    pub fn value(&self, flag: char) -> Option<&str> {
        self.opts
            .iter()
            .rev()
            .find(|(c, _)| *c == flag)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Returns the values of every occurrence of an option, in order.
    pub fn values(&self, flag: char) -> Vec<&str> {
        self.opts
            .iter()
            .filter(|(c, _)| *c == flag)
            .filter_map(|(_, v)| v.as_deref())
            .collect()
    }

    /// Returns the flag that appears last among `flags`, if any.
    pub fn last_of(&self, flags: &[char]) -> Option<char> {
        self.opts
            .iter()
            .rev()
            .map(|(c, _)| *c)
            .find(|c| flags.contains(c))
    }
}

/// getopt-style parser configured with a spec such as `"n:bv"`.
#[derive(Debug, Clone)]
pub struct Getopt<'a> {
    spec: &'a str,
    stop_at_operand: bool,
}

impl<'a> Getopt<'a> {
    /// Creates a parser. Each spec character is a flag; a trailing `:`
    /// marks an option that takes a value.
    pub fn new(spec: &'a str) -> Self {
        Self {
            spec,
            stop_at_operand: false,
        }
    }

    /// Stops option parsing at the first operand.
    pub fn stop_at_operand(mut self, stop: bool) -> Self {
        self.stop_at_operand = stop;
        self
    }

    /// Returns Some(takes_value) if `flag` is in the spec.
    fn lookup(&self, flag: char) -> Option<bool> {
        if flag == ':' {
            return None;
        }
        let idx = self.spec.find(flag)?;
        Some(self.spec[idx + flag.len_utf8()..].starts_with(':'))
    }

    /// Parses `args`, skipping `args[0]` (the applet name).
    pub fn parse(&self, args: &[String]) -> AppletResult<Options> {
        let mut parsed = Options::default();
        let mut iter = args.iter().skip(1);
        let mut only_operands = false;

        while let Some(arg) = iter.next() {
            if only_operands {
                parsed.operands.push(arg.clone());
                continue;
            }
            if arg == "--" {
                only_operands = true;
                continue;
            }
            if arg.len() < 2 || !arg.starts_with('-') {
                parsed.operands.push(arg.clone());
                if self.stop_at_operand {
                    only_operands = true;
                }
                continue;
            }

            let body = &arg[1..];
            for (i, flag) in body.char_indices() {
                match self.lookup(flag) {
                    None => return Err(AppletError::invalid_option(flag.to_string())),
                    Some(false) => parsed.opts.push((flag, None)),
                    Some(true) => {
                        let rest = &body[i + flag.len_utf8()..];
                        let value = if rest.is_empty() {
                            iter.next()
                                .cloned()
                                .ok_or_else(|| AppletError::missing_argument(flag.to_string()))?
                        } else {
                            rest.to_string()
                        };
                        parsed.opts.push((flag, Some(value)));
                        break;
                    }
                }
            }
        }

        Ok(parsed)
    }
}

/// Rewrites the historical `-NUM` shorthand (`head -5`) into `-FLAG NUM`.
pub fn expand_numeric_shorthand(args: &[String], flag: char) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 1);
    for (i, arg) in args.iter().enumerate() {
        let digits = arg.strip_prefix('-').unwrap_or("");
        if i > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            out.push(format!("-{}", flag));
            out.push(digits.to_string());
        } else {
            out.push(arg.clone());
        }
    }
    out
}

/// Parses a non-negative count operand.
pub fn parse_count(value: &str) -> AppletResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| AppletError::invalid_number(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clustered_flags() {
        let opts = Getopt::new("rfv").parse(&argv(&["rm", "-rf", "a", "-v"])).unwrap();
        assert!(opts.has('r'));
        assert!(opts.has('f'));
        assert!(opts.has('v'));
        assert_eq!(opts.operands, argv(&["a"]));
    }

    #[test]
    fn test_option_values() {
        let opts = Getopt::new("n:c")
            .parse(&argv(&["head", "-n", "3", "-cn7", "file"]))
            .unwrap();
        assert_eq!(opts.value('n'), Some("7"));
        assert_eq!(opts.values('n'), vec!["3", "7"]);
        assert!(opts.has('c'));
        assert_eq!(opts.operands, argv(&["file"]));
    }

    #[test]
    fn test_double_dash_and_stdin() {
        let opts = Getopt::new("n").parse(&argv(&["cat", "-", "--", "-n"])).unwrap();
        assert!(!opts.has('n'));
        assert_eq!(opts.operands, argv(&["-", "-n"]));
    }

    #[test]
    fn test_stop_at_operand() {
        let opts = Getopt::new("i")
            .stop_at_operand(true)
            .parse(&argv(&["env", "-i", "ls", "-i"]))
            .unwrap();
        assert_eq!(opts.count('i'), 1);
        assert_eq!(opts.operands, argv(&["ls", "-i"]));
    }

    #[test]
    fn test_errors() {
        let err = Getopt::new("n:").parse(&argv(&["head", "-x"])).unwrap_err();
        assert_eq!(err.to_string(), "invalid option -- 'x'");

        let err = Getopt::new("n:").parse(&argv(&["head", "-n"])).unwrap_err();
        assert_eq!(err.to_string(), "option requires an argument -- 'n'");
    }

    #[test]
    fn test_last_of() {
        let opts = Getopt::new("rR").parse(&argv(&["x", "-r", "-R"])).unwrap();
        assert_eq!(opts.last_of(&['r', 'R']), Some('R'));
        assert_eq!(opts.last_of(&['q']), None);
    }

    #[test]
    fn test_numeric_shorthand() {
        assert_eq!(
            expand_numeric_shorthand(&argv(&["head", "-5", "f"]), 'n'),
            argv(&["head", "-n", "5", "f"])
        );
        assert_eq!(
            expand_numeric_shorthand(&argv(&["head", "-", "-n3"]), 'n'),
            argv(&["head", "-", "-n3"])
        );
    }
}
