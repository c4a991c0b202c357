//! Filters: tr, cut, sort, uniq, grep.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};

use regex::bytes::{Regex, RegexBuilder};
use rustybox_common::{
    operands_or_stdin, parse_count, AppletError, AppletResult, Getopt, Streams, STDIN_OPERAND,
};

use super::{next_line, read_or_warn, warn_operand};

fn lines_of(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    let body = data.strip_suffix(b"\n").unwrap_or(data);
    body.split(|&b| b == b'\n').collect()
}

// =============================================================================
// tr
// =============================================================================

fn class_members(name: &str) -> Option<Vec<u8>> {
    let test: fn(&u8) -> bool = match name {
        "alnum" => u8::is_ascii_alphanumeric,
        "alpha" => u8::is_ascii_alphabetic,
        "blank" => |b| *b == b' ' || *b == b'\t',
        "cntrl" => u8::is_ascii_control,
        "digit" => u8::is_ascii_digit,
        "graph" => u8::is_ascii_graphic,
        "lower" => u8::is_ascii_lowercase,
        "print" => |b| b.is_ascii_graphic() || *b == b' ',
        "punct" => u8::is_ascii_punctuation,
        "space" => |b| b.is_ascii_whitespace() || *b == 0x0b,
        "upper" => u8::is_ascii_uppercase,
        "xdigit" => u8::is_ascii_hexdigit,
        _ => return None,
    };
    Some((0u8..=255).filter(test).collect())
}

/// Reads one possibly-escaped byte of a tr set.
fn next_set_byte(bytes: &[u8], i: &mut usize) -> u8 {
    let b = bytes[*i];
    *i += 1;
    if b != b'\\' || *i == bytes.len() {
        return b;
    }
    let next = bytes[*i];
    *i += 1;
    match next {
        b'n' => b'\n',
        b't' => b'\t',
        b'r' => b'\r',
        b'a' => 0x07,
        b'b' => 0x08,
        b'f' => 0x0c,
        b'v' => 0x0b,
        b'0'..=b'7' => {
            let mut value = u32::from(next - b'0');
            let mut digits = 1;
            while digits < 3 && *i < bytes.len() && (b'0'..=b'7').contains(&bytes[*i]) {
                value = value * 8 + u32::from(bytes[*i] - b'0');
                *i += 1;
                digits += 1;
            }
            (value & 0xff) as u8
        }
        other => other,
    }
}

/// Expands a tr set: escapes, `a-z` ranges and `[:class:]` names.
pub(crate) fn expand_tr_set(set: &str) -> AppletResult<Vec<u8>> {
    let bytes = set.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"[:") {
            if let Some(end) = set[i + 2..].find(":]") {
                let name = &set[i + 2..i + 2 + end];
                let members = class_members(name)
                    .ok_or_else(|| AppletError::usage(format!("invalid character class '{}'", name)))?;
                out.extend(members);
                i += end + 4;
                continue;
            }
        }
        let first = next_set_byte(bytes, &mut i);
        if i + 1 < bytes.len() && bytes[i] == b'-' {
            i += 1;
            let last = next_set_byte(bytes, &mut i);
            if last < first {
                return Err(AppletError::usage(format!(
                    "range-endpoints of '{}-{}' are in reverse collating sequence order",
                    first as char, last as char
                )));
            }
            out.extend(first..=last);
        } else {
            out.push(first);
        }
    }
    Ok(out)
}

/// `tr [-cds] SET1 [SET2]`
pub fn tr_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("cCds").parse(args)?;
    let delete = opts.has('d');
    let squeeze = opts.has('s');
    let complement = opts.has('c') || opts.has('C');

    let (set1, set2) = match opts.operands.as_slice() {
        [a] => (a.as_str(), None),
        [a, b] => (a.as_str(), Some(b.as_str())),
        _ => return Err(AppletError::usage("usage: tr [-cds] SET1 [SET2]")),
    };
    if set2.is_none() && !delete && !squeeze {
        return Err(AppletError::usage("missing operand after SET1"));
    }

    let mut set1 = expand_tr_set(set1)?;
    if complement {
        let mut member = [false; 256];
        for &b in &set1 {
            member[usize::from(b)] = true;
        }
        set1 = (0u8..=255).filter(|b| !member[usize::from(*b)]).collect();
    }
    let set2 = set2.map(expand_tr_set).transpose()?;

    let mut in_set1 = [false; 256];
    for &b in &set1 {
        in_set1[usize::from(b)] = true;
    }

    let mut map: [u8; 256] = std::array::from_fn(|i| i as u8);
    let translating = !delete && set2.as_ref().is_some_and(|s| !s.is_empty());
    if let Some(set2) = set2.as_ref().filter(|_| translating) {
        let pad = set2[set2.len() - 1];
        for (i, &from) in set1.iter().enumerate() {
            map[usize::from(from)] = set2.get(i).copied().unwrap_or(pad);
        }
    }

    // Squeeze applies to SET2 when translating or deleting, else SET1.
    let mut squeeze_set = [false; 256];
    if squeeze {
        let source = match (&set2, delete || translating) {
            (Some(s), true) => s.as_slice(),
            _ => set1.as_slice(),
        };
        for &b in source {
            squeeze_set[usize::from(b)] = true;
        }
    }

    // Translate one buffered chunk at a time; `last` carries across chunks.
    let mut out = Vec::new();
    let mut last: Option<u8> = None;
    loop {
        let chunk = io.stdin.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        out.clear();
        for &b in chunk {
            if delete && in_set1[usize::from(b)] {
                continue;
            }
            let c = map[usize::from(b)];
            if squeeze && squeeze_set[usize::from(c)] && last == Some(c) {
                continue;
            }
            out.push(c);
            last = Some(c);
        }
        let consumed = chunk.len();
        io.stdin.consume(consumed);
        io.stdout.write_all(&out)?;
    }
    Ok(0)
}

// =============================================================================
// cut
// =============================================================================

/// Parses a cut list such as `1,3-5,7-` into inclusive 1-based ranges.
pub(crate) fn parse_cut_list(list: &str) -> AppletResult<Vec<(usize, usize)>> {
    let invalid = || AppletError::usage(format!("invalid list '{}'", list));
    let mut ranges = Vec::new();
    for part in list.split(',') {
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => {
                let lo = if lo.is_empty() { 1 } else { parse_count(lo).map_err(|_| invalid())? };
                let hi = if hi.is_empty() {
                    usize::MAX
                } else {
                    parse_count(hi).map_err(|_| invalid())?
                };
                (lo, hi)
            }
            None => {
                let n = parse_count(part).map_err(|_| invalid())?;
                (n, n)
            }
        };
        if lo == 0 || hi < lo {
            return Err(invalid());
        }
        ranges.push((lo, hi));
    }
    Ok(ranges)
}

fn selected(ranges: &[(usize, usize)], position: usize) -> bool {
    ranges.iter().any(|&(lo, hi)| position >= lo && position <= hi)
}

/// `cut -f LIST [-d C] [-s] | -c LIST | -b LIST [FILE...]`
pub fn cut_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("b:c:f:d:sn").parse(args)?;
    let delimiter = match opts.value('d') {
        Some(d) => {
            let mut chars = d.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(AppletError::usage("the delimiter must be a single character")),
            }
        }
        None => '\t',
    };
    let only_delimited = opts.has('s');

    enum Mode {
        Fields(Vec<(usize, usize)>),
        Chars(Vec<(usize, usize)>),
        Bytes(Vec<(usize, usize)>),
    }
    let mode = match (opts.value('f'), opts.value('c'), opts.value('b')) {
        (Some(list), None, None) => Mode::Fields(parse_cut_list(list)?),
        (None, Some(list), None) => Mode::Chars(parse_cut_list(list)?),
        (None, None, Some(list)) => Mode::Bytes(parse_cut_list(list)?),
        _ => {
            return Err(AppletError::usage(
                "you must specify exactly one of -b, -c or -f",
            ))
        }
    };

    let separator = delimiter.to_string();
    let mut status = 0;
    for name in operands_or_stdin(opts.operands.clone()) {
        let cut = io.for_each_line(&name, |line, out| {
            let line = line.strip_suffix(b"\n").unwrap_or(line);
            match &mode {
                Mode::Bytes(ranges) => {
                    let picked: Vec<u8> = line
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| selected(ranges, i + 1))
                        .map(|(_, b)| *b)
                        .collect();
                    out.write_all(&picked)?;
                }
                Mode::Chars(ranges) => {
                    let text = String::from_utf8_lossy(line);
                    let picked: String = text
                        .chars()
                        .enumerate()
                        .filter(|(i, _)| selected(ranges, i + 1))
                        .map(|(_, c)| c)
                        .collect();
                    out.write_all(picked.as_bytes())?;
                }
                Mode::Fields(ranges) => {
                    let text = String::from_utf8_lossy(line);
                    if !text.contains(delimiter) {
                        if only_delimited {
                            return Ok(true);
                        }
                        out.write_all(line)?;
                    } else {
                        let picked: Vec<&str> = text
                            .split(delimiter)
                            .enumerate()
                            .filter(|(i, _)| selected(ranges, i + 1))
                            .map(|(_, f)| f)
                            .collect();
                        out.write_all(picked.join(separator.as_str()).as_bytes())?;
                    }
                }
            }
            out.write_all(b"\n")?;
            Ok(true)
        });
        if warn_operand(io, "cut", cut)?.is_none() {
            status = 1;
        }
    }
    Ok(status)
}

// =============================================================================
// sort
// =============================================================================

/// Leading numeric value of a line as `sort -n` sees it; non-numbers are 0.
fn numeric_prefix(line: &str) -> f64 {
    let trimmed = line.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in trimmed.char_indices() {
        match c {
            '-' | '+' if i == 0 => {}
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SortKeys {
    pub numeric: bool,
    pub fold_case: bool,
}

impl SortKeys {
    /// Compares by the selected keys only.
    pub(crate) fn compare(&self, a: &str, b: &str) -> Ordering {
        if self.numeric {
            return numeric_prefix(a)
                .partial_cmp(&numeric_prefix(b))
                .unwrap_or(Ordering::Equal);
        }
        if self.fold_case {
            return a.to_lowercase().cmp(&b.to_lowercase());
        }
        a.cmp(b)
    }
}

/// `sort [-rnuf] [FILE...]`
pub fn sort_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("rnufo:").parse(args)?;
    let keys = SortKeys {
        numeric: opts.has('n'),
        fold_case: opts.has('f'),
    };
    let unique = opts.has('u');
    let reverse = opts.has('r');

    let mut status = 0;
    let mut lines: Vec<String> = Vec::new();
    for name in operands_or_stdin(opts.operands.clone()) {
        let Some(data) = read_or_warn(io, "sort", &name) else {
            status = 1;
            continue;
        };
        lines.extend(
            lines_of(&data)
                .into_iter()
                .map(|l| String::from_utf8_lossy(l).into_owned()),
        );
    }

    // Ties on the keys fall back to a plain byte comparison unless -u.
    lines.sort_by(|a, b| {
        let ord = keys.compare(a, b);
        let ord = if ord == Ordering::Equal && !unique {
            a.cmp(b)
        } else {
            ord
        };
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
    if unique {
        lines.dedup_by(|a, b| keys.compare(a, b) == Ordering::Equal);
    }

    let mut text = String::new();
    for line in &lines {
        text.push_str(line);
        text.push('\n');
    }
    match opts.value('o') {
        Some(path) => std::fs::write(path, text).map_err(|e| AppletError::io(path, e))?,
        None => io.stdout.write_all(text.as_bytes())?,
    }
    Ok(status)
}

// =============================================================================
// uniq
// =============================================================================

/// `uniq [-cdui] [INPUT [OUTPUT]]`
pub fn uniq_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("cdui").parse(args)?;
    let (input, output) = match opts.operands.as_slice() {
        [] => (STDIN_OPERAND, None),
        [input] => (input.as_str(), None),
        [input, output] => (input.as_str(), Some(output.as_str())),
        _ => return Err(AppletError::usage("usage: uniq [-cdui] [INPUT [OUTPUT]]")),
    };
    let ignore_case = opts.has('i');
    let only_repeated = opts.has('d');
    let only_unique = opts.has('u');
    let show_count = opts.has('c');

    let same = |a: &str, b: &str| {
        if ignore_case {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    };
    let emit = |out: &mut dyn Write, line: &str, count: usize| -> AppletResult<()> {
        if (only_repeated && count < 2) || (only_unique && count > 1) {
            return Ok(());
        }
        if show_count {
            write!(out, "{:>7} ", count)?;
        }
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    };

    let mut target = match output {
        Some(path) => Some(BufWriter::new(
            File::create(path).map_err(|e| AppletError::io(path, e))?,
        )),
        None => None,
    };

    // Only the current group is held: its first line and its size.
    io.with_reader(input, |reader, stdout| {
        let out: &mut dyn Write = match target.as_mut() {
            Some(file) => file,
            None => stdout,
        };
        let mut line = Vec::new();
        let mut group: Option<(String, usize)> = None;
        while next_line(reader, input, &mut line)? {
            let text = String::from_utf8_lossy(line.strip_suffix(b"\n").unwrap_or(&line));
            let repeated = matches!(&group, Some((first, _)) if same(first, &text));
            if repeated {
                if let Some((_, count)) = group.as_mut() {
                    *count += 1;
                }
                continue;
            }
            if let Some((first, count)) = group.take() {
                emit(out, &first, count)?;
            }
            group = Some((text.into_owned(), 1));
        }
        if let Some((first, count)) = group {
            emit(out, &first, count)?;
        }
        Ok(())
    })?;
    if let (Some(file), Some(path)) = (target.as_mut(), output) {
        file.flush().map_err(|e| AppletError::io(path, e))?;
    }
    Ok(0)
}

// =============================================================================
// grep
// =============================================================================

/// Rewrites a POSIX basic regular expression into `regex` syntax: `\(`,
/// `\)`, `\{`, `\}`, `\|`, `\+` and `\?` become operators and their bare
/// forms become literals. Bracket expressions are copied untouched.
pub(crate) fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(op @ ('(' | ')' | '{' | '}' | '|' | '+' | '?')) => out.push(op),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str("\\\\"),
            },
            '(' | ')' | '{' | '}' | '|' | '+' | '?' => {
                out.push('\\');
                out.push(c);
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    out.push_str("\\]");
                    chars.next();
                }
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Options that shape how grep builds its matcher.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MatcherFlags {
    pub fixed: bool,
    pub extended: bool,
    pub ignore_case: bool,
    pub whole_word: bool,
    pub whole_line: bool,
}

/// Compiles every pattern into a single alternation.
pub(crate) fn build_matcher(patterns: &[String], flags: MatcherFlags) -> AppletResult<Regex> {
    let alternatives: Vec<String> = patterns
        .iter()
        .flat_map(|p| p.split('\n'))
        .map(|p| {
            if flags.fixed {
                regex::escape(p)
            } else if flags.extended {
                p.to_string()
            } else {
                basic_to_extended(p)
            }
        })
        .map(|p| format!("(?:{})", p))
        .collect();
    let mut combined = alternatives.join("|");
    if flags.whole_line {
        combined = format!("^(?:{})$", combined);
    } else if flags.whole_word {
        combined = format!(r"\b(?:{})\b", combined);
    }
    RegexBuilder::new(&combined)
        .case_insensitive(flags.ignore_case)
        .build()
        .map_err(|e| AppletError::syntax(e.to_string()))
}

/// `grep [-EFHhilnqsvcwx] [-e PATTERN]... [PATTERN] [FILE...]`
///
/// Exit status is 0 when a line was selected, 1 when none was and 2 on
/// errors.
pub fn grep_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("EFGHhilnqsvcwxe:f:")
        .parse(args)
        .map_err(|e| AppletError::syntax(e.to_string()))?;
    let invoked_as = args.first().map(String::as_str).unwrap_or("grep");
    let flags = MatcherFlags {
        fixed: opts.has('F') || invoked_as.ends_with("fgrep"),
        extended: opts.has('E') || invoked_as.ends_with("egrep"),
        ignore_case: opts.has('i'),
        whole_word: opts.has('w'),
        whole_line: opts.has('x'),
    };
    let invert = opts.has('v');
    let count_only = opts.has('c');
    let names_only = opts.has('l');
    let quiet = opts.has('q');
    let silent_errors = opts.has('s');
    let numbered = opts.has('n');

    let mut operands = opts.operands.clone();
    let mut patterns: Vec<String> = opts.values('e').into_iter().map(str::to_string).collect();
    for path in opts.values('f') {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppletError::syntax(AppletError::io(path, e).to_string())
        })?;
        patterns.extend(rustybox_common::split_lines(&text).into_iter().map(str::to_string));
    }
    if patterns.is_empty() {
        if operands.is_empty() {
            return Err(AppletError::syntax("usage: grep [OPTIONS] PATTERN [FILE...]"));
        }
        patterns.push(operands.remove(0));
    }
    let matcher = build_matcher(&patterns, flags)?;

    let files = operands_or_stdin(operands);
    let with_names = match opts.last_of(&['H', 'h']) {
        Some('H') => true,
        Some('h') => false,
        _ => files.len() > 1,
    };

    let mut any_selected = false;
    let mut had_error = false;
    for name in &files {
        let shown = if name == STDIN_OPERAND {
            "(standard input)"
        } else {
            name.as_str()
        };

        // Lines are written as they match; -q, -l and -c stop writing them.
        let searched = io.with_reader(name, |reader, out| {
            let mut line = Vec::new();
            let mut count = 0usize;
            let mut number = 0usize;
            while next_line(reader, name, &mut line)? {
                number += 1;
                let body = line.strip_suffix(b"\n").unwrap_or(&line);
                if matcher.is_match(body) == invert {
                    continue;
                }
                count += 1;
                if quiet {
                    break;
                }
                if count_only || names_only {
                    continue;
                }
                if with_names {
                    write!(out, "{}:", shown)?;
                }
                if numbered {
                    write!(out, "{}:", number)?;
                }
                out.write_all(body)?;
                out.write_all(b"\n")?;
            }
            Ok(count)
        });
        let count = match searched {
            Ok(count) => count,
            Err(e @ AppletError::Stream(_)) => return Err(e),
            Err(e) => {
                if !silent_errors {
                    io.warn("grep", &e);
                }
                had_error = true;
                continue;
            }
        };
        if count > 0 {
            any_selected = true;
            if quiet {
                return Ok(0);
            }
        }

        if names_only {
            if count > 0 {
                io.println(shown)?;
            }
        } else if count_only {
            if with_names {
                write!(io.stdout, "{}:", shown)?;
            }
            io.println(count.to_string())?;
        }
    }

    Ok(match (had_error, any_selected) {
        (true, _) => 2,
        (false, true) => 0,
        (false, false) => 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expand_tr_set() {
        assert_eq!(expand_tr_set("a-e").unwrap(), b"abcde".to_vec());
        assert_eq!(expand_tr_set("\\n\\t").unwrap(), b"\n\t".to_vec());
        assert_eq!(expand_tr_set("[:digit:]").unwrap(), b"0123456789".to_vec());
        assert_eq!(expand_tr_set("x-").unwrap(), b"x-".to_vec());
        assert!(expand_tr_set("z-a").is_err());
        assert!(expand_tr_set("[:nope:]").is_err());
    }

    #[test]
    fn test_parse_cut_list() {
        assert_eq!(
            parse_cut_list("1,3-4,6-").unwrap(),
            vec![(1, 1), (3, 4), (6, usize::MAX)]
        );
        assert_eq!(parse_cut_list("-2").unwrap(), vec![(1, 2)]);
        assert!(parse_cut_list("0").is_err());
        assert!(parse_cut_list("3-1").is_err());
        assert!(parse_cut_list("a").is_err());
    }

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(numeric_prefix("  42abc"), 42.0);
        assert_eq!(numeric_prefix("-1.5"), -1.5);
        assert_eq!(numeric_prefix("abc"), 0.0);
    }

    #[test]
    fn test_sort_keys() {
        let keys = SortKeys {
            numeric: true,
            fold_case: false,
        };
        assert_eq!(keys.compare("10", "9"), Ordering::Greater);
        let keys = SortKeys {
            numeric: false,
            fold_case: true,
        };
        assert_eq!(keys.compare("B", "a"), Ordering::Greater);
    }

    #[test]
    fn test_basic_to_extended() {
        assert_eq!(basic_to_extended(r"a\(b\)\{2\}"), "a(b){2}");
        assert_eq!(basic_to_extended("a+b?(c)"), r"a\+b\?\(c\)");
        assert_eq!(basic_to_extended("[]()]x"), r"[\]()]x");
    }

    #[test]
    fn test_build_matcher() {
        let flags = MatcherFlags::default();
        let re = build_matcher(&["a.c".to_string()], flags).unwrap();
        assert!(re.is_match(b"xabcx"));

        let fixed = MatcherFlags {
            fixed: true,
            ..Default::default()
        };
        let re = build_matcher(&["a.c".to_string()], fixed).unwrap();
        assert!(!re.is_match(b"abc"));
        assert!(re.is_match(b"a.c"));

        let word = MatcherFlags {
            whole_word: true,
            ignore_case: true,
            ..Default::default()
        };
        let re = build_matcher(&["foo".to_string(), "bar".to_string()], word).unwrap();
        assert!(re.is_match(b"a BAR b"));
        assert!(!re.is_match(b"foobar"));
    }
}
