//! Copy and move applets: cp, mv.

use std::fs::{self, DirBuilder, File, FileTimes, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use rustybox_common::{io_message, AppletError, AppletResult, Getopt, Streams};

use super::fs::lexists;

/// How one copy behaves.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CopyOptions {
    pub recursive: bool,
    pub force: bool,
    pub preserve: bool,
}

/// Splits `SOURCE... DEST` and resolves where each source lands: inside DEST
/// when it is a directory, DEST itself otherwise.
fn plan_targets(operands: &[String]) -> AppletResult<Vec<(String, PathBuf)>> {
    let (dest, sources) = match operands.split_last() {
        None => return Err(AppletError::usage("missing file operand")),
        Some((dest, [])) => {
            return Err(AppletError::usage(format!(
                "missing destination file operand after '{}'",
                dest
            )))
        }
        Some((dest, sources)) => (dest, sources),
    };
    let dest_path = Path::new(dest);
    let into_dir = dest_path.is_dir();
    if sources.len() > 1 && !into_dir {
        return Err(AppletError::failed(format!(
            "target '{}' is not a directory",
            dest
        )));
    }
    sources
        .iter()
        .map(|source| {
            if !into_dir {
                return Ok((source.clone(), dest_path.to_path_buf()));
            }
            let name = Path::new(source.trim_end_matches('/'))
                .file_name()
                .ok_or_else(|| AppletError::failed(format!("invalid source '{}'", source)))?;
            Ok((source.clone(), dest_path.join(name)))
        })
        .collect()
}

fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.dev() == b.dev() && a.ino() == b.ino()
}

fn preserve_times(path: &Path, meta: &Metadata) -> io::Result<()> {
    let times = FileTimes::new()
        .set_accessed(meta.accessed()?)
        .set_modified(meta.modified()?);
    File::options().write(true).open(path)?.set_times(times)
}

fn copy_file(source: &Path, target: &Path, meta: &Metadata, opts: CopyOptions) -> io::Result<()> {
    let opened = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target);
    let mut out = match opened {
        Ok(file) => file,
        Err(e) if opts.force && e.kind() == io::ErrorKind::PermissionDenied => {
            fs::remove_file(target)?;
            File::create(target)?
        }
        Err(e) => return Err(e),
    };
    let mut input = File::open(source)?;
    io::copy(&mut input, &mut out)?;
    out.set_permissions(Permissions::from_mode(meta.permissions().mode()))?;
    drop(out);
    if opts.preserve {
        preserve_times(target, meta)?;
    }
    Ok(())
}

/// Copies `source` to `target`. Directories need `opts.recursive`; inside
/// a recursive copy symlinks are recreated rather than followed.
pub(crate) fn copy_path(source: &Path, target: &Path, opts: CopyOptions) -> AppletResult<()> {
    let meta = if opts.recursive {
        fs::symlink_metadata(source)
    } else {
        fs::metadata(source)
    }
    .map_err(|e| {
        AppletError::failed(format!(
            "cannot stat '{}': {}",
            source.display(),
            io_message(&e)
        ))
    })?;
    let failed = |e: io::Error| {
        AppletError::failed(format!(
            "cannot copy '{}' to '{}': {}",
            source.display(),
            target.display(),
            io_message(&e)
        ))
    };

    if let Ok(existing) = fs::metadata(target) {
        if same_file(&meta, &existing) {
            return Err(AppletError::failed(format!(
                "'{}' and '{}' are the same file",
                source.display(),
                target.display()
            )));
        }
    }

    if meta.file_type().is_symlink() {
        let link = fs::read_link(source).map_err(failed)?;
        if lexists(target) {
            fs::remove_file(target).map_err(failed)?;
        }
        return symlink(link, target).map_err(failed);
    }

    if !meta.is_dir() {
        return copy_file(source, target, &meta, opts).map_err(failed);
    }
    if !opts.recursive {
        return Err(AppletError::failed(format!(
            "'{}' is a directory (not copied)",
            source.display()
        )));
    }
    let target_parent = target.parent().unwrap_or(Path::new("."));
    if let (Ok(from), Ok(to)) = (fs::canonicalize(source), fs::canonicalize(target_parent)) {
        if to.starts_with(&from) {
            return Err(AppletError::failed(format!(
                "cannot copy a directory, '{}', into itself, '{}'",
                source.display(),
                target.display()
            )));
        }
    }

    if !target.is_dir() {
        DirBuilder::new().create(target).map_err(failed)?;
    }
    let mut children = fs::read_dir(source)
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|e| e.file_name()))
                .collect::<io::Result<Vec<_>>>()
        })
        .map_err(failed)?;
    children.sort();
    for name in children {
        copy_path(&source.join(&name), &target.join(&name), opts)?;
    }
    fs::set_permissions(target, Permissions::from_mode(meta.permissions().mode()))
        .map_err(failed)?;
    if opts.preserve {
        preserve_times(target, &meta).map_err(failed)?;
    }
    Ok(())
}

/// `cp [-rRfpav] SOURCE... DEST`
pub fn cp_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("rRfpavd").parse(args)?;
    let targets = plan_targets(&opts.operands)?;
    let copy = CopyOptions {
        recursive: opts.has('r') || opts.has('R') || opts.has('a'),
        force: opts.has('f'),
        preserve: opts.has('p') || opts.has('a'),
    };
    let verbose = opts.has('v');

    let mut status = 0;
    for (source, target) in targets {
        match copy_path(Path::new(&source), &target, copy) {
            Ok(()) if verbose => io.println(format!("'{}' -> '{}'", source, target.display()))?,
            Ok(()) => {}
            Err(e) => {
                io.warn("cp", e);
                status = 1;
            }
        }
    }
    Ok(status)
}

fn remove_path(path: &Path, meta: &Metadata) -> io::Result<()> {
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Renames `source` to `target`, copying then deleting when they sit on
/// different filesystems.
pub(crate) fn move_path(source: &Path, target: &Path) -> AppletResult<()> {
    let failed = |e: io::Error| {
        AppletError::failed(format!(
            "cannot move '{}' to '{}': {}",
            source.display(),
            target.display(),
            io_message(&e)
        ))
    };
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            tracing::debug!(from = %source.display(), to = %target.display(), "Rename crosses devices, copying");
            let meta = fs::symlink_metadata(source).map_err(failed)?;
            let opts = CopyOptions {
                recursive: true,
                force: true,
                preserve: true,
            };
            copy_path(source, target, opts)?;
            remove_path(source, &meta).map_err(failed)
        }
        Err(e) => Err(failed(e)),
    }
}

/// `mv [-fniv] SOURCE... DEST`
pub fn mv_main(args: &[String], io: &mut Streams<'_>) -> AppletResult<i32> {
    let opts = Getopt::new("fniv").parse(args)?;
    let targets = plan_targets(&opts.operands)?;
    let no_clobber = opts.last_of(&['f', 'n']) == Some('n');
    let verbose = opts.has('v');

    let mut status = 0;
    for (source, target) in targets {
        if no_clobber && lexists(&target) {
            continue;
        }
        match move_path(Path::new(&source), &target) {
            Ok(()) if verbose => {
                io.println(format!("renamed '{}' -> '{}'", source, target.display()))?
            }
            Ok(()) => {}
            Err(e) => {
                io.warn("mv", e);
                status = 1;
            }
        }
    }
    Ok(status)
}
