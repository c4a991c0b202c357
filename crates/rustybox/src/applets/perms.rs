//! Ownership and permission applets: chmod, chown, chgrp.

use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use nix::unistd::{chown, Gid, Group, Uid, User};
use rustybox_common::{io_message, AppletError, AppletResult, Getopt, Streams};

use super::fs::{for_each_operand, walk_tree};

/// Renders the nine `rwx` permission characters, with `s`/`S` and `t`/`T`
/// standing in for the set-id and sticky bits.
pub(crate) fn permission_string(mode: u32) -> String {
    let special = |set: bool, exec: bool, lower: char, upper: char, plain: char| match (set, exec)
    {
        (true, true) => lower,
        (true, false) => upper,
        (false, true) => plain,
        (false, false) => '-',
    };
    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    [
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        special(mode & 0o4000 != 0, mode & 0o100 != 0, 's', 'S', 'x'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        special(mode & 0o2000 != 0, mode & 0o010 != 0, 's', 'S', 'x'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        special(mode & 0o1000 != 0, mode & 0o001 != 0, 't', 'T', 'x'),
    ]
    .iter()
    .collect()
}

/// `ls -l` style mode column: the file type character then the permissions.
pub(crate) fn mode_string(meta: &Metadata) -> String {
    let kind = meta.file_type();
    let type_char = if kind.is_dir() {
        'd'
    } else if kind.is_symlink() {
        'l'
    } else if kind.is_char_device() {
        'c'
    } else if kind.is_block_device() {
        'b'
    } else if kind.is_fifo() {
        'p'
    } else if kind.is_socket() {
        's'
    } else {
        '-'
    };
    format!("{}{}", type_char, permission_string(meta.permissions().mode()))
}

// =============================================================================
// chmod
// =============================================================================

/// Where the permission bits of one symbolic action come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PermSource {
    /// Letters from `rwxXst`.
    Letters(String),
    /// A copy of the `u`, `g` or `o` bits of the current mode.
    Copy(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Action {
    op: char,
    source: PermSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    /// Bits the clause may touch, from its `ugoa` prefix.
    who: u32,
    actions: Vec<Action>,
}

/// A parsed chmod MODE operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModeSpec {
    Absolute(u32),
    Symbolic(Vec<Clause>),
}

fn who_mask(c: char) -> Option<u32> {
    match c {
        'u' => Some(0o4700),
        'g' => Some(0o2070),
        'o' => Some(0o1007),
        'a' => Some(0o7777),
        _ => None,
    }
}

impl ModeSpec {
    /// Parses octal modes and comma-separated `[ugoa]*[-+=][rwxXst]*` clauses.
    pub(crate) fn parse(text: &str) -> AppletResult<Self> {
        let invalid = || AppletError::failed(format!("invalid mode: '{}'", text));
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            return u32::from_str_radix(text, 8)
                .ok()
                .filter(|mode| *mode <= 0o7777)
                .map(ModeSpec::Absolute)
                .ok_or_else(invalid);
        }

        let mut clauses = Vec::new();
        for part in text.split(',') {
            let mut chars = part.chars().peekable();
            let mut who = 0;
            while let Some(mask) = chars.peek().copied().and_then(who_mask) {
                who |= mask;
                chars.next();
            }

            let mut actions = Vec::new();
            while let Some(op) = chars.next() {
                if !matches!(op, '+' | '-' | '=') {
                    return Err(invalid());
                }
                let mut letters = String::new();
                let mut copy = None;
                while let Some(&c) = chars.peek() {
                    match c {
                        '+' | '-' | '=' => break,
                        'r' | 'w' | 'x' | 'X' | 's' | 't' if copy.is_none() => letters.push(c),
                        'u' | 'g' | 'o' if letters.is_empty() && copy.is_none() => copy = Some(c),
                        _ => return Err(invalid()),
                    }
                    chars.next();
                }
                let source = match copy {
                    Some(c) => PermSource::Copy(c),
                    None => PermSource::Letters(letters),
                };
                actions.push(Action { op, source });
            }
            if actions.is_empty() {
                return Err(invalid());
            }
            clauses.push(Clause {
                who: if who == 0 { 0o7777 } else { who },
                actions,
            });
        }
        Ok(ModeSpec::Symbolic(clauses))
    }

    /// The mode `current` becomes; `is_dir` decides what `X` means.
    pub(crate) fn apply(&self, current: u32, is_dir: bool) -> u32 {
        let clauses = match self {
            ModeSpec::Absolute(mode) => return *mode,
            ModeSpec::Symbolic(clauses) => clauses,
        };
        let mut mode = current & 0o7777;
        for clause in clauses {
            for action in &clause.actions {
                let bits = match &action.source {
                    PermSource::Copy(class) => {
                        let shift = match class {
                            'u' => 6,
                            'g' => 3,
                            _ => 0,
                        };
                        ((mode >> shift) & 0o7) * 0o111
                    }
                    PermSource::Letters(letters) => letters.chars().fold(0, |acc, c| {
                        acc | match c {
                            'r' => 0o444,
                            'w' => 0o222,
                            'x' => 0o111,
                            'X' if is_dir || mode & 0o111 != 0 => 0o111,
                            's' => 0o6000,
                            't' => 0o1000,
                            _ => 0,
                        }
                    }),
                };
                let bits = bits & clause.who;
                mode = match action.op {
                    '+' => mode | bits,
                    '-' => mode & !bits,
                    _ => (mode & !clause.who) | bits,
                };
            }
        }
        mode
    }
}

/// Runs `op` on `root`, and with `recursive` on everything below it.
/// Symlinks met during the walk are skipped; `root` itself is followed.
fn for_each_target<F>(root: &str, recursive: bool, mut op: F) -> AppletResult<()>
where
    F: FnMut(&Path) -> AppletResult<()>,
{
    let root_path = Path::new(root);
    if !recursive {
        return op(root_path);
    }
    walk_tree(root_path, &mut |path, meta| {
        if meta.file_type().is_symlink() && path != root_path {
            return Ok(());
        }
        op(path)
    })
}

/// `chmod [-Rvcf] MODE FILE...`
pub fn chmod_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("Rvcf").parse(args)?;
    let [mode, files @ ..] = opts.operands.as_slice() else {
        return Err(AppletError::usage("missing operand"));
    };
    if files.is_empty() {
        return Err(AppletError::usage(format!("missing operand after '{}'", mode)));
    }
    let spec = ModeSpec::parse(mode)?;
    let recursive = opts.has('R');
    let verbose = opts.has('v');
    let changes = opts.has('c');
    let quiet = opts.has('f');

    let mut report = Vec::new();
    let mut errors = Vec::new();
    for file in files {
        let done = for_each_target(file, recursive, |path| {
            let meta = fs::metadata(path).map_err(|e| {
                AppletError::failed(format!(
                    "cannot access '{}': {}",
                    path.display(),
                    io_message(&e)
                ))
            })?;
            let old = meta.permissions().mode() & 0o7777;
            let new = spec.apply(old, meta.is_dir());
            if new != old {
                fs::set_permissions(path, Permissions::from_mode(new)).map_err(|e| {
                    AppletError::failed(format!(
                        "changing permissions of '{}': {}",
                        path.display(),
                        io_message(&e)
                    ))
                })?;
            }
            if verbose || (changes && new != old) {
                report.push(format!(
                    "mode of '{}' changed from {:04o} ({}) to {:04o} ({})",
                    path.display(),
                    old,
                    permission_string(old),
                    new,
                    permission_string(new)
                ));
            }
            Ok(())
        });
        if let Err(e) = done {
            errors.push(e);
        }
    }

    for line in report {
        io.println(line)?;
    }
    if !quiet {
        for e in &errors {
            io.warn("chmod", e);
        }
    }
    Ok(i32::from(!errors.is_empty()))
}

// =============================================================================
// chown / chgrp
// =============================================================================

fn resolve_user(name: &str) -> AppletResult<Uid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    User::from_name(name)
        .ok()
        .flatten()
        .map(|user| user.uid)
        .ok_or_else(|| AppletError::failed(format!("invalid user: '{}'", name)))
}

fn resolve_group(name: &str) -> AppletResult<Gid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    Group::from_name(name)
        .ok()
        .flatten()
        .map(|group| group.gid)
        .ok_or_else(|| AppletError::failed(format!("invalid group: '{}'", name)))
}

/// Parses `OWNER`, `OWNER:GROUP`, `OWNER:` (the owner's login group) and
/// `:GROUP`. A `.` separates too when no user has the whole name.
pub(crate) fn parse_owner_spec(spec: &str) -> AppletResult<(Option<Uid>, Option<Gid>)> {
    let split = spec.split_once(':').or_else(|| {
        let whole_user = User::from_name(spec).ok().flatten().is_some();
        if whole_user {
            None
        } else {
            spec.split_once('.')
        }
    });
    let (owner, group) = match split {
        Some((owner, group)) => (owner, Some(group)),
        None => (spec, None),
    };

    let uid = (!owner.is_empty()).then(|| resolve_user(owner)).transpose()?;
    let gid = match group {
        Some("") => match uid {
            Some(uid) => User::from_uid(uid).ok().flatten().map(|user| user.gid),
            None => None,
        },
        Some(group) => Some(resolve_group(group)?),
        None => None,
    };
    if uid.is_none() && gid.is_none() && !spec.is_empty() && spec != ":" {
        return Err(AppletError::failed(format!("invalid spec: '{}'", spec)));
    }
    Ok((uid, gid))
}

/// Shared body of chown and chgrp once the new ids are known.
fn change_owner(
    applet: &str,
    opts_recursive: bool,
    verbose: bool,
    (uid, gid): (Option<Uid>, Option<Gid>),
    shown: &str,
    files: &[String],
    io: &mut Streams<'_>,
) -> AppletResult<i32> {
    let mut report = Vec::new();
    let status = for_each_operand(applet, files, io, |file| {
        for_each_target(file, opts_recursive, |path| {
            chown(path, uid, gid).map_err(|e| {
                AppletError::failed(format!(
                    "changing ownership of '{}': {}",
                    path.display(),
                    e.desc()
                ))
            })?;
            if verbose {
                report.push(format!("ownership of '{}' set to {}", path.display(), shown));
            }
            Ok(())
        })
    });
    for line in report {
        io.println(line)?;
    }
    Ok(status)
}

/// `chown [-Rv] OWNER[:GROUP] FILE...`
pub fn chown_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("Rvf").parse(args)?;
    let [spec, files @ ..] = opts.operands.as_slice() else {
        return Err(AppletError::usage("missing operand"));
    };
    if files.is_empty() {
        return Err(AppletError::usage(format!("missing operand after '{}'", spec)));
    }
    let ids = parse_owner_spec(spec)?;
    change_owner("chown", opts.has('R'), opts.has('v'), ids, spec, files, io)
}

/// `chgrp [-Rv] GROUP FILE...`
pub fn chgrp_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("Rvf").parse(args)?;
    let [group, files @ ..] = opts.operands.as_slice() else {
        return Err(AppletError::usage("missing operand"));
    };
    if files.is_empty() {
        return Err(AppletError::usage(format!("missing operand after '{}'", group)));
    }
    let gid = resolve_group(group)?;
    change_owner("chgrp", opts.has('R'), opts.has('v'), (None, Some(gid)), group, files, io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o755), "rwxr-xr-x");
        assert_eq!(permission_string(0o640), "rw-r-----");
        assert_eq!(permission_string(0o4755), "rwsr-xr-x");
        assert_eq!(permission_string(0o2644), "rw-r-Sr--");
        assert_eq!(permission_string(0o1777), "rwxrwxrwt");
        assert_eq!(permission_string(0o1776), "rwxrwxrwT");
    }

    #[test]
    fn test_absolute_modes() {
        assert_eq!(ModeSpec::parse("755").unwrap(), ModeSpec::Absolute(0o755));
        assert_eq!(ModeSpec::parse("0644").unwrap().apply(0o777, false), 0o644);
        assert!(ModeSpec::parse("8").is_err());
        assert!(ModeSpec::parse("17777").is_err());
    }

    #[test]
    fn test_symbolic_modes() {
        let apply = |spec: &str, mode: u32, dir: bool| ModeSpec::parse(spec).unwrap().apply(mode, dir);
        assert_eq!(apply("u+x", 0o644, false), 0o744);
        assert_eq!(apply("go-w", 0o666, false), 0o644);
        assert_eq!(apply("a=r", 0o777, false), 0o444);
        assert_eq!(apply("+x", 0o600, false), 0o711);
        assert_eq!(apply("u=rw,go=", 0o777, false), 0o600);
        assert_eq!(apply("g=u", 0o740, false), 0o770);
        assert_eq!(apply("o+t", 0o777, true), 0o1777);
        assert_eq!(apply("u+s", 0o755, false), 0o4755);
        // X only adds execute for directories or already-executable files.
        assert_eq!(apply("a+X", 0o644, false), 0o644);
        assert_eq!(apply("a+X", 0o644, true), 0o755);
        assert_eq!(apply("a+X", 0o744, false), 0o755);
        assert_eq!(apply("u-w+x", 0o644, false), 0o544);

        assert!(ModeSpec::parse("u").is_err());
        assert!(ModeSpec::parse("u+q").is_err());
        assert!(ModeSpec::parse("z+x").is_err());
        assert!(ModeSpec::parse("").is_err());
    }

    #[test]
    fn test_parse_owner_spec() {
        assert_eq!(
            parse_owner_spec("0:0").unwrap(),
            (Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
        );
        assert_eq!(parse_owner_spec("42").unwrap(), (Some(Uid::from_raw(42)), None));
        assert_eq!(parse_owner_spec(":7").unwrap(), (None, Some(Gid::from_raw(7))));
        assert_eq!(
            parse_owner_spec("5.6").unwrap(),
            (Some(Uid::from_raw(5)), Some(Gid::from_raw(6)))
        );
        let err = parse_owner_spec("no-such-user-rustybox").unwrap_err();
        assert_eq!(err.to_string(), "invalid user: 'no-such-user-rustybox'");
        assert!(parse_owner_spec("0:no-such-group-rustybox").is_err());
    }
}
