//! Filesystem applets: mkdir, rmdir, touch, link, unlink, ln, rm,
//! readlink, realpath, truncate, sync, fsync, mktemp.

use std::fs::{self, DirBuilder, File, FileTimes, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rand::Rng;
use rustybox_common::{io_message, AppletError, AppletResult, Getopt, Streams};

/// True if anything, including a dangling symlink, exists at `path`.
pub(crate) fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Parses an octal permission mode such as `755` or `0640`.
pub(crate) fn parse_mode(text: &str) -> AppletResult<u32> {
    u32::from_str_radix(text, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| AppletError::usage(format!("invalid mode '{}'", text)))
}

/// Calls `visit` on `root` and, when it is a directory, on everything below
/// it, parents first and siblings in name order. Symlinks are never followed.
pub(crate) fn walk_tree<F>(root: &Path, visit: &mut F) -> AppletResult<()>
where
    F: FnMut(&Path, &Metadata) -> AppletResult<()>,
{
    let meta =
        fs::symlink_metadata(root).map_err(|e| AppletError::io(root.to_string_lossy(), e))?;
    visit(root, &meta)?;
    if meta.is_dir() {
        let mut children = fs::read_dir(root)
            .map_err(|e| AppletError::io(root.to_string_lossy(), e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| AppletError::io(root.to_string_lossy(), e))?;
        children.sort();
        for child in children {
            walk_tree(&child, visit)?;
        }
    }
    Ok(())
}

/// Runs `op` over every operand, warning about failures. Returns 1 if any
/// operand failed.
pub(crate) fn for_each_operand<F>(applet: &str, operands: &[String], io: &mut Streams<'_>, mut op: F) -> i32
where
    F: FnMut(&str) -> AppletResult<()>,
{
    let mut status = 0;
    for operand in operands {
        if let Err(e) = op(operand) {
            io.warn(applet, e);
            status = 1;
        }
    }
    status
}

pub(crate) fn require_operands(opts_operands: &[String], usage: &str) -> AppletResult<()> {
    if opts_operands.is_empty() {
        return Err(AppletError::usage(usage));
    }
    Ok(())
}

// =============================================================================
// mkdir / rmdir
// =============================================================================

/// `mkdir [-p] [-m MODE] DIR...`
pub fn mkdir_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("pm:v").parse(args)?;
    require_operands(&opts.operands, "usage: mkdir [-p] [-m MODE] DIR...")?;
    let parents = opts.has('p');
    let mode = opts.value('m').map(parse_mode).transpose()?;

    Ok(for_each_operand("mkdir", &opts.operands, io, |dir| {
        let path = Path::new(dir);
        if parents && path.is_dir() {
            return Ok(());
        }
        let cannot_create = |e: io::Error| {
            AppletError::failed(format!("cannot create directory '{}': {}", dir, io_message(&e)))
        };
        // Missing parents get the default mode; MODE is for DIR alone.
        if parents {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                DirBuilder::new()
                    .recursive(true)
                    .create(parent)
                    .map_err(cannot_create)?;
            }
        }
        DirBuilder::new()
            .mode(mode.unwrap_or(0o777))
            .create(path)
            .map_err(cannot_create)?;
        // The umask applies to the builder; an explicit mode must not.
        if let Some(mode) = mode {
            fs::set_permissions(path, Permissions::from_mode(mode))
                .map_err(|e| AppletError::io(dir, e))?;
        }
        tracing::trace!(path = %dir, "Created directory");
        Ok(())
    }))
}

/// `rmdir [-p] DIR...`
pub fn rmdir_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("p").parse(args)?;
    require_operands(&opts.operands, "usage: rmdir [-p] DIR...")?;
    let parents = opts.has('p');

    Ok(for_each_operand("rmdir", &opts.operands, io, |dir| {
        let mut path = Path::new(dir.trim_end_matches('/'));
        if path.as_os_str().is_empty() {
            path = Path::new("/");
        }
        loop {
            fs::remove_dir(path).map_err(|e| {
                AppletError::failed(format!(
                    "failed to remove '{}': {}",
                    path.display(),
                    io_message(&e)
                ))
            })?;
            if !parents {
                return Ok(());
            }
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() && parent != Path::new("/") => {
                    path = parent;
                }
                _ => return Ok(()),
            }
        }
    }))
}

// =============================================================================
// touch
// =============================================================================

/// `touch [-c] FILE...`
pub fn touch_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("cam").parse(args)?;
    require_operands(&opts.operands, "usage: touch [-c] FILE...")?;
    let no_create = opts.has('c');

    Ok(for_each_operand("touch", &opts.operands, io, |name| {
        let path = Path::new(name);
        if fs::metadata(path).is_err() {
            if no_create {
                return Ok(());
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|e| AppletError::io(name, e))?;
            return Ok(());
        }
        let now = SystemTime::now();
        File::open(path)
            .and_then(|f| f.set_times(FileTimes::new().set_accessed(now).set_modified(now)))
            .map_err(|e| AppletError::io(name, e))
    }))
}

// =============================================================================
// link / unlink / ln
// =============================================================================

/// `link FILE1 FILE2`
pub fn link_main(args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    let [from, to] = opts.operands.as_slice() else {
        return Err(AppletError::usage("usage: link FILE1 FILE2"));
    };
    fs::hard_link(from, to).map_err(|e| {
        AppletError::failed(format!(
            "cannot create link '{}' to '{}': {}",
            to,
            from,
            io_message(&e)
        ))
    })?;
    Ok(0)
}

/// `unlink FILE`
pub fn unlink_main(args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    let [name] = opts.operands.as_slice() else {
        return Err(AppletError::usage("usage: unlink FILE"));
    };
    fs::remove_file(name).map_err(|e| {
        AppletError::failed(format!("cannot unlink '{}': {}", name, io_message(&e)))
    })?;
    Ok(0)
}

fn file_name_of(target: &str) -> AppletResult<&std::ffi::OsStr> {
    Path::new(target.trim_end_matches('/'))
        .file_name()
        .ok_or_else(|| AppletError::usage(format!("cannot derive a link name from '{}'", target)))
}

/// `ln [-s] [-f] [-n] TARGET [LINK]` or `ln [-sfn] TARGET... DIR`
pub fn ln_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("sfnv").parse(args)?;
    let symbolic = opts.has('s');
    let force = opts.has('f');
    let no_deref = opts.has('n');

    let (targets, dest): (&[String], PathBuf) = match opts.operands.as_slice() {
        [] => return Err(AppletError::usage("usage: ln [-sfn] TARGET [LINK]")),
        [target] => (std::slice::from_ref(target), PathBuf::from(".")),
        [targets @ .., last] => (targets, PathBuf::from(last)),
    };

    let into_dir = if no_deref {
        fs::symlink_metadata(&dest).is_ok_and(|m| m.is_dir())
    } else {
        dest.is_dir()
    };
    if targets.len() > 1 && !into_dir {
        return Err(AppletError::failed(format!(
            "target '{}' is not a directory",
            dest.display()
        )));
    }

    Ok(for_each_operand("ln", targets, io, |target| {
        let link = if into_dir {
            dest.join(file_name_of(target)?)
        } else {
            dest.clone()
        };
        if force && lexists(&link) {
            fs::remove_file(&link).map_err(|e| AppletError::io(link.display().to_string(), e))?;
        }
        let created = if symbolic {
            std::os::unix::fs::symlink(target, &link)
        } else {
            fs::hard_link(target, &link)
        };
        created.map_err(|e| {
            AppletError::failed(format!(
                "failed to create {} '{}': {}",
                if symbolic { "symbolic link" } else { "hard link" },
                link.display(),
                io_message(&e)
            ))
        })
    }))
}

// =============================================================================
// rm
// =============================================================================

/// `rm [-r|-R] [-f] FILE...`
pub fn rm_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("rRfid").parse(args)?;
    let recursive = opts.has('r') || opts.has('R');
    let force = opts.has('f');
    let remove_empty_dirs = opts.has('d');
    if opts.operands.is_empty() && !force {
        return Err(AppletError::usage("usage: rm [-rRf] FILE..."));
    }

    Ok(for_each_operand("rm", &opts.operands, io, |name| {
        let base = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
        if base == "." || base == ".." {
            return Err(AppletError::failed(format!(
                "refusing to remove '.' or '..' directory: skipping '{}'",
                name
            )));
        }

        let meta = match fs::symlink_metadata(name) {
            Ok(meta) => meta,
            Err(e) if force && e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(AppletError::failed(format!(
                    "cannot remove '{}': {}",
                    name,
                    io_message(&e)
                )))
            }
        };

        let removed = if !meta.is_dir() {
            fs::remove_file(name)
        } else if recursive {
            fs::remove_dir_all(name)
        } else if remove_empty_dirs {
            fs::remove_dir(name)
        } else {
            return Err(AppletError::failed(format!(
                "cannot remove '{}': Is a directory",
                name
            )));
        };
        removed.map_err(|e| {
            AppletError::failed(format!("cannot remove '{}': {}", name, io_message(&e)))
        })
    }))
}

// =============================================================================
// readlink / realpath
// =============================================================================

/// Canonicalizes `path`, allowing the final component not to exist.
pub(crate) fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let name = path.file_name().ok_or(e)?;
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            Ok(fs::canonicalize(parent)?.join(name))
        }
        Err(e) => Err(e),
    }
}

/// `readlink [-f] FILE`
pub fn readlink_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("fnqsv").parse(args)?;
    let [name] = opts.operands.as_slice() else {
        return Err(AppletError::usage("usage: readlink [-f] FILE"));
    };
    let newline = !opts.has('n');

    let resolved = if opts.has('f') {
        canonicalize_lenient(Path::new(name))
    } else {
        fs::read_link(name)
    };
    // Not a link (or unresolvable): fail quietly.
    let Ok(resolved) = resolved else {
        return Ok(1);
    };
    let text = resolved.to_string_lossy();
    if newline {
        io.println(text)?;
    } else {
        io.stdout.write_all(text.as_bytes())?;
    }
    Ok(0)
}

/// `realpath FILE...`
pub fn realpath_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("").parse(args)?;
    require_operands(&opts.operands, "usage: realpath FILE...")?;

    let mut status = 0;
    for name in &opts.operands {
        match canonicalize_lenient(Path::new(name)) {
            Ok(resolved) => io.println(resolved.to_string_lossy())?,
            Err(e) => {
                io.warn("realpath", AppletError::io(name.as_str(), e));
                status = 1;
            }
        }
    }
    Ok(status)
}

// =============================================================================
// truncate / sync
// =============================================================================

/// How truncate's `-s` adjusts a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeChange {
    Set(u64),
    Grow(u64),
    Shrink(u64),
}

impl SizeChange {
    pub(crate) fn apply(self, current: u64) -> u64 {
        match self {
            SizeChange::Set(n) => n,
            SizeChange::Grow(n) => current.saturating_add(n),
            SizeChange::Shrink(n) => current.saturating_sub(n),
        }
    }
}

/// Parses `[+|-]SIZE[K|M|G|T]` (binary multiples).
pub(crate) fn parse_size_change(text: &str) -> AppletResult<SizeChange> {
    let invalid = || AppletError::invalid_number(text);
    let (ctor, rest): (fn(u64) -> SizeChange, &str) = match text.as_bytes().first() {
        Some(b'+') => (SizeChange::Grow, &text[1..]),
        Some(b'-') => (SizeChange::Shrink, &text[1..]),
        _ => (SizeChange::Set, text),
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, suffix) = rest.split_at(digits_end);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match suffix {
        "" => 1,
        "K" | "k" => 1 << 10,
        "M" | "m" => 1 << 20,
        "G" | "g" => 1 << 30,
        "T" | "t" => 1 << 40,
        _ => return Err(invalid()),
    };
    let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;
    Ok(ctor(bytes))
}

/// `truncate [-c] -s [+|-]SIZE[KMG] FILE...`
pub fn truncate_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("cs:").parse(args)?;
    let change = opts
        .value('s')
        .ok_or_else(|| AppletError::usage("you must specify -s SIZE"))
        .and_then(parse_size_change)?;
    require_operands(&opts.operands, "usage: truncate [-c] -s SIZE FILE...")?;
    let no_create = opts.has('c');

    Ok(for_each_operand("truncate", &opts.operands, io, |name| {
        if no_create && !Path::new(name).exists() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .write(true)
            .create(!no_create)
            .truncate(false)
            .open(name)
            .map_err(|e| AppletError::io(name, e))?;
        let current = file.metadata().map_err(|e| AppletError::io(name, e))?.len();
        file.set_len(change.apply(current))
            .map_err(|e| AppletError::io(name, e))
    }))
}

/// `sync`
pub fn sync_main(_args: &[String], _io: &mut Streams<'_>) -> AppletResult<i32> {
    nix::unistd::sync();
    Ok(0)
}

/// `fsync [-d] FILE...`
pub fn fsync_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("d").parse(args)?;
    require_operands(&opts.operands, "usage: fsync [-d] FILE...")?;
    let data_only = opts.has('d');

    Ok(for_each_operand("fsync", &opts.operands, io, |name| {
        let file = File::open(name).map_err(|e| AppletError::io(name, e))?;
        let synced = if data_only {
            file.sync_data()
        } else {
            file.sync_all()
        };
        synced.map_err(|e| AppletError::io(name, e))
    }))
}

// =============================================================================
// mktemp
// =============================================================================

const TEMPLATE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Attempts before mktemp gives up on finding an unused name.
const MKTEMP_ATTEMPTS: usize = 100;

/// Replaces the trailing run of `X`s in `template` with random letters and
/// digits. At least three are required.
pub(crate) fn fill_template(template: &str, rng: &mut impl Rng) -> AppletResult<String> {
    let run = template.bytes().rev().take_while(|&b| b == b'X').count();
    if run < 3 {
        return Err(AppletError::failed(format!(
            "too few X's in template '{}'",
            template
        )));
    }
    let mut name = template[..template.len() - run].to_string();
    for _ in 0..run {
        name.push(char::from(TEMPLATE_CHARS[rng.gen_range(0..TEMPLATE_CHARS.len())]));
    }
    Ok(name)
}

fn temp_dir() -> PathBuf {
    std::env::var_os("TMPDIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// `mktemp [-dqu] [-p DIR] [-t] [TEMPLATE]`
pub fn mktemp_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("dqup:t").parse(args)?;
    let directory = opts.has('d');
    let dry_run = opts.has('u');
    let quiet = opts.has('q');

    let template = match opts.operands.as_slice() {
        [] => None,
        [template] => Some(template.as_str()),
        _ => return Err(AppletError::usage("usage: mktemp [-dqu] [-p DIR] [-t] [TEMPLATE]")),
    };
    let base = match opts.value('p') {
        Some(dir) => Some(PathBuf::from(dir)),
        None if opts.has('t') || template.is_none() => Some(temp_dir()),
        None => None,
    };
    let template = template.unwrap_or("tmp.XXXXXX");

    // -q turns every failure into a silent exit status of 1.
    let fail = |e: AppletError| -> AppletResult<i32> {
        if quiet {
            Ok(1)
        } else {
            Err(e)
        }
    };

    let mut rng = rand::thread_rng();
    for _ in 0..MKTEMP_ATTEMPTS {
        let name = match fill_template(template, &mut rng) {
            Ok(name) => name,
            Err(e) => return fail(e),
        };
        let path = match &base {
            Some(dir) => dir.join(&name),
            None => PathBuf::from(&name),
        };
        let created = if dry_run {
            if lexists(&path) {
                continue;
            }
            Ok(())
        } else if directory {
            DirBuilder::new().mode(0o700).create(&path)
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
                .map(drop)
        };
        match created {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "Created temporary entry");
                io.println(path.to_string_lossy())?;
                return Ok(0);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                let kind = if directory { "directory" } else { "file" };
                return fail(AppletError::failed(format!(
                    "failed to create {} via template '{}': {}",
                    kind,
                    path.display(),
                    io_message(&e)
                )));
            }
        }
    }
    fail(AppletError::failed(format!(
        "cannot find an unused name for '{}'",
        template
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert_eq!(parse_mode("0640").unwrap(), 0o640);
        assert!(parse_mode("u+x").is_err());
        assert!(parse_mode("77777").is_err());
    }

    #[test]
    fn test_parse_size_change() {
        assert_eq!(parse_size_change("10").unwrap(), SizeChange::Set(10));
        assert_eq!(parse_size_change("2K").unwrap(), SizeChange::Set(2048));
        assert_eq!(parse_size_change("+1M").unwrap(), SizeChange::Grow(1 << 20));
        assert_eq!(parse_size_change("-5").unwrap(), SizeChange::Shrink(5));
        assert!(parse_size_change("5X").is_err());
        assert!(parse_size_change("").is_err());
    }

    #[test]
    fn test_size_change_apply() {
        assert_eq!(SizeChange::Grow(5).apply(10), 15);
        assert_eq!(SizeChange::Shrink(50).apply(10), 0);
        assert_eq!(SizeChange::Set(3).apply(10), 3);
    }

    #[test]
    fn test_canonicalize_lenient() {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(canonicalize_lenient(&missing).unwrap(), root.join("missing"));
        assert!(canonicalize_lenient(&dir.path().join("no/such")).is_err());
    }

    #[test]
    fn test_fill_template() {
        let mut rng = rand::thread_rng();
        let name = fill_template("report.XXXXXX", &mut rng).unwrap();
        assert_eq!(name.len(), "report.XXXXXX".len());
        assert!(name.starts_with("report."));
        assert!(name[7..].bytes().all(|b| TEMPLATE_CHARS.contains(&b)));
        // Only the trailing run is replaced.
        assert!(fill_template("XXXa.XXX", &mut rng).unwrap().starts_with("XXXa."));
        assert!(fill_template("tmp.XX", &mut rng).is_err());
    }

    #[test]
    fn test_walk_tree_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        fs::write(dir.path().join("a"), "").unwrap();
        fs::write(dir.path().join("b/c/d"), "").unwrap();

        let mut seen = Vec::new();
        walk_tree(dir.path(), &mut |path, _| {
            seen.push(path.strip_prefix(dir.path()).unwrap().to_path_buf());
            Ok(())
        })
        .unwrap();
        let seen: Vec<_> = seen.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(seen, vec!["", "a", "b", "b/c", "b/c/d"]);
    }

    #[test]
    fn test_lexists_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &link).unwrap();
        assert!(lexists(&link));
        assert!(!link.exists());
    }
}
