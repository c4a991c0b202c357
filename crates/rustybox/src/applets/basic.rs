//! Trivial applets: echo, pwd, true, false, yes, sleep, usleep, seq,
//! basename, dirname.

use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::time::Duration;

use rustybox_common::{AppletError, AppletResult, Getopt, Streams};

// =============================================================================
// echo
// =============================================================================

/// Expands echo's backslash escapes. Returns the bytes and whether `\c`
/// asked to stop all further output.
pub(crate) fn expand_echo_escapes(input: &str, out: &mut Vec<u8>) -> bool {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = bytes[i + 1];
        i += 2;
        match next {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'c' => return true,
            b'e' => out.push(0x1b),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' => out.push(b'\\'),
            b'0'..=b'7' => {
                // \0NNN or \NNN, at most three digits after an optional leading 0
                let mut value: u32 = 0;
                let mut digits = 0;
                if next != b'0' {
                    value = u32::from(next - b'0');
                    digits = 1;
                }
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    digits += 1;
                    i += 1;
                }
                out.push((value & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    false
}

/// `echo [-neE] [ARG...]`
pub fn echo_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let mut newline = true;
    let mut escapes = false;
    let mut start = 1;

    // Only words made entirely of n/e/E are options; anything else is text.
    while let Some(arg) = args.get(start) {
        let Some(flags) = arg.strip_prefix('-') else {
            break;
        };
        if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
            break;
        }
        for c in flags.chars() {
            match c {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        start += 1;
    }

    let mut out = Vec::new();
    for (idx, word) in args.iter().skip(start).enumerate() {
        if idx > 0 {
            out.push(b' ');
        }
        if escapes {
            if expand_echo_escapes(word, &mut out) {
                io.stdout.write_all(&out)?;
                return Ok(0);
            }
        } else {
            out.extend_from_slice(word.as_bytes());
        }
    }
    if newline {
        out.push(b'\n');
    }
    io.stdout.write_all(&out)?;
    Ok(0)
}

// =============================================================================
// pwd / true / false
// =============================================================================

/// Returns $PWD if it is absolute, free of `.`/`..` and names the current
/// directory.
fn logical_cwd() -> Option<String> {
    let pwd = std::env::var("PWD").ok()?;
    if !pwd.starts_with('/') || pwd.split('/').any(|c| c == "." || c == "..") {
        return None;
    }
    let logical = std::fs::metadata(&pwd).ok()?;
    let physical = std::fs::metadata(".").ok()?;
    (logical.dev() == physical.dev() && logical.ino() == physical.ino()).then_some(pwd)
}

/// `pwd [-L|-P]`
pub fn pwd_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("LP").parse(args)?;
    let physical = opts.last_of(&['L', 'P']) == Some('P');

    let cwd = match (physical, logical_cwd()) {
        (false, Some(pwd)) => pwd,
        _ => std::env::current_dir()
            .map_err(|e| AppletError::io(".", e))?
            .to_string_lossy()
            .into_owned(),
    };
    io.println(cwd)?;
    Ok(0)
}

/// `true`
pub fn true_main(_args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    Ok(0)
}

/// `false`
pub fn false_main(_args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    Ok(1)
}

// =============================================================================
// yes / sleep / usleep
// =============================================================================

/// `yes [STRING...]` -- runs until the output is closed.
pub fn yes_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let line = if args.len() > 1 {
        args[1..].join(" ")
    } else {
        "y".to_string()
    };
    let mut chunk = String::new();
    while chunk.len() < 4096 {
        chunk.push_str(&line);
        chunk.push('\n');
    }
    loop {
        io.stdout.write_all(chunk.as_bytes())?;
    }
}

/// Parses a sleep interval such as `1.5`, `2m` or `1d`.
pub(crate) fn parse_interval(text: &str) -> AppletResult<Duration> {
    let (number, scale) = match text.char_indices().last() {
        Some((idx, 's')) => (&text[..idx], 1.0),
        Some((idx, 'm')) => (&text[..idx], 60.0),
        Some((idx, 'h')) => (&text[..idx], 3600.0),
        Some((idx, 'd')) => (&text[..idx], 86400.0),
        _ => (text, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| AppletError::invalid_number(text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(AppletError::invalid_number(text));
    }
    Duration::try_from_secs_f64(value * scale).map_err(|_| AppletError::invalid_number(text))
}

/// `sleep DURATION...`
pub fn sleep_main(args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    if args.len() < 2 {
        return Err(AppletError::usage("usage: sleep N[smhd]..."));
    }
    let mut total = Duration::ZERO;
    for arg in &args[1..] {
        total = total
            .checked_add(parse_interval(arg)?)
            .ok_or_else(|| AppletError::invalid_number(arg.as_str()))?;
    }
    std::thread::sleep(total);
    Ok(0)
}

/// `usleep MICROSECONDS`
pub fn usleep_main(args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    let micros = match args.get(1) {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| AppletError::invalid_number(v.as_str()))?,
        None => return Err(AppletError::usage("usage: usleep N")),
    };
    std::thread::sleep(Duration::from_micros(micros));
    Ok(0)
}

// =============================================================================
// seq
// =============================================================================

fn decimal_places(text: &str) -> usize {
    text.split_once('.')
        .map(|(_, frac)| frac.chars().take_while(|c| c.is_ascii_digit()).count())
        .unwrap_or(0)
}

fn parse_seq_number(text: &str) -> AppletResult<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppletError::invalid_number(text))
}

/// `seq [-w] [-s SEP] [FIRST [INCREMENT]] LAST`
pub fn seq_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let mut separator = "\n".to_string();
    let mut equal_width = false;
    let mut idx = 1;

    // Options end at the first word that looks like a number ("-1" included).
    while let Some(arg) = args.get(idx) {
        let looks_numeric = arg
            .strip_prefix('-')
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_digit() || c == '.');
        if !arg.starts_with('-') || arg == "-" || looks_numeric {
            break;
        }
        match arg.as_str() {
            "-w" => equal_width = true,
            "-s" => {
                idx += 1;
                separator = args
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| AppletError::missing_argument("s"))?;
            }
            "--" => {
                idx += 1;
                break;
            }
            other if other.starts_with("-s") => separator = other[2..].to_string(),
            other => return Err(AppletError::invalid_option(&other[1..])),
        }
        idx += 1;
    }

    let operands = &args[idx.min(args.len())..];
    let (first, step, last) = match operands {
        [last] => ("1", "1", last.as_str()),
        [first, last] => (first.as_str(), "1", last.as_str()),
        [first, step, last] => (first.as_str(), step.as_str(), last.as_str()),
        [] => return Err(AppletError::usage("usage: seq [first [incr]] last")),
        _ => return Err(AppletError::usage("too many arguments")),
    };

    let start = parse_seq_number(first)?;
    let incr = parse_seq_number(step)?;
    let end = parse_seq_number(last)?;
    if incr == 0.0 {
        return Err(AppletError::failed(format!("invalid increment: '{}'", step)));
    }

    let precision = decimal_places(first).max(decimal_places(step));
    let render = |v: f64| format!("{:.*}", precision, v);
    let width = if equal_width {
        render(start).len().max(render(end).len())
    } else {
        0
    };

    let mut n: u64 = 0;
    loop {
        // Multiply instead of accumulating so long runs do not drift.
        let value = start + incr * n as f64;
        if (incr > 0.0 && value > end) || (incr < 0.0 && value < end) {
            break;
        }
        if n > 0 {
            io.stdout.write_all(separator.as_bytes())?;
        }
        let text = render(value);
        if equal_width && text.len() < width {
            let (sign, digits) = match text.strip_prefix('-') {
                Some(d) => ("-", d),
                None => ("", text.as_str()),
            };
            write!(io.stdout, "{}{}{}", sign, "0".repeat(width - text.len()), digits)?;
        } else {
            io.stdout.write_all(text.as_bytes())?;
        }
        n += 1;
    }
    if n > 0 {
        io.stdout.write_all(b"\n")?;
    }
    Ok(0)
}

// =============================================================================
// basename / dirname
// =============================================================================

/// Computes `basename NAME [SUFFIX]`.
pub(crate) fn basename(name: &str, suffix: Option<&str>) -> String {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.is_empty() { String::new() } else { "/".to_string() };
    }
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match suffix {
        Some(sfx) if !sfx.is_empty() && base != sfx && base.ends_with(sfx) => {
            base[..base.len() - sfx.len()].to_string()
        }
        _ => base.to_string(),
    }
}

/// Computes `dirname NAME`.
pub(crate) fn dirname(name: &str) -> String {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.starts_with('/') { "/".to_string() } else { ".".to_string() };
    }
    match trimmed.rfind('/') {
        None => ".".to_string(),
        Some(idx) => {
            let parent = trimmed[..idx].trim_end_matches('/');
            if parent.is_empty() {
                "/".to_string()
            } else {
                parent.to_string()
            }
        }
    }
}

/// `basename NAME [SUFFIX]`
pub fn basename_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    match opts.operands.as_slice() {
        [name] => io.println(basename(name, None))?,
        [name, suffix] => io.println(basename(name, Some(suffix)))?,
        _ => return Err(AppletError::usage("usage: basename string [suffix]")),
    }
    Ok(0)
}

/// `dirname NAME...`
pub fn dirname_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    if opts.operands.is_empty() {
        return Err(AppletError::usage("usage: dirname string"));
    }
    for name in &opts.operands {
        io.println(dirname(name))?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_echo_escapes() {
        let mut out = Vec::new();
        assert!(!expand_echo_escapes(r"a\tb\n\0101\101\\", &mut out));
        assert_eq!(out, b"a\tb\nAA\\");

        let mut out = Vec::new();
        assert!(expand_echo_escapes(r"stop\chere", &mut out));
        assert_eq!(out, b"stop");

        let mut out = Vec::new();
        expand_echo_escapes(r"\q trailing\", &mut out);
        assert_eq!(out, b"\\q trailing\\");
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_interval("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_interval("abc").is_err());
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("99999999999999999999").is_err());
        assert!(parse_interval("1e300d").is_err());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/sort", None), "sort");
        assert_eq!(basename("include/stdio.h", Some(".h")), "stdio");
        assert_eq!(basename("/usr/lib/", None), "lib");
        assert_eq!(basename("/", None), "/");
        assert_eq!(basename(".h", Some(".h")), ".h");
        assert_eq!(basename("", None), "");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/usr/bin/sort"), "/usr/bin");
        assert_eq!(dirname("/usr/lib/"), "/usr");
        assert_eq!(dirname("stdio.h"), ".");
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/usr"), "/");
        assert_eq!(dirname("a//b"), "a");
        assert_eq!(dirname(""), ".");
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places("1"), 0);
        assert_eq!(decimal_places("0.25"), 2);
        assert_eq!(decimal_places("-1.5"), 1);
    }
}
