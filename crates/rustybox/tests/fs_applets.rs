//! Integration tests for the filesystem applets.
//!
//! Tests cover:
//! - mkdir/rmdir with and without -p
//! - touch, truncate, link/unlink
//! - ln -s/-f into files and directories
//! - rm refusal rules and -r/-f
//! - readlink/realpath resolution
//! - chmod octal and symbolic modes, chown/chgrp
//! - cp/mv of files and trees
//! - ls, stat -c, du, df
//! - fsync and mktemp

use std::fs;
use std::io::Cursor;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use rustybox::{AppletRegistry, Implementation};
use rustybox_common::Streams;
use tempfile::TempDir;

/// Test fixture: a scratch directory and a native registry.
struct Sandbox {
    dir: TempDir,
    registry: AppletRegistry,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            registry: AppletRegistry::new(Implementation::Native),
        }
    }

    /// Absolute path of `name` inside the sandbox.
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }

    /// Runs an applet, returning (exit code, stdout, stderr).
    fn run(&self, args: &[String]) -> (i32, String, String) {
        let mut stdin = Cursor::new(Vec::new());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut io = Streams::new(&mut stdin, &mut stdout, &mut stderr);
        let code = self.registry.execute(&args[0], args, &mut io);
        (
            code,
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        )
    }
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_mkdir_and_rmdir() {
    let sb = Sandbox::new();
    let nested = sb.arg("a/b/c");

    let (code, _, stderr) = sb.run(&argv(&["mkdir", &nested]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("mkdir: cannot create directory"));

    assert_eq!(sb.run(&argv(&["mkdir", "-p", &nested])).0, 0);
    assert!(sb.path("a/b/c").is_dir());
    // -p on an existing directory is not an error
    assert_eq!(sb.run(&argv(&["mkdir", "-p", &nested])).0, 0);

    assert_eq!(sb.run(&argv(&["rmdir", &nested])).0, 0);
    assert!(!sb.path("a/b/c").exists());
    assert!(sb.path("a/b").is_dir());

    let (code, _, stderr) = sb.run(&argv(&["rmdir", &sb.arg("a")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("rmdir: failed to remove"));
}

#[test]
fn test_mkdir_mode_ignores_umask() {
    let sb = Sandbox::new();
    let dir = sb.arg("open");
    assert_eq!(sb.run(&argv(&["mkdir", "-m", "777", &dir])).0, 0);
    let mode = fs::metadata(sb.path("open")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o777);

    assert_eq!(sb.run(&argv(&["mkdir", "-m", "9", &sb.arg("bad")])).0, 1);
}

#[test]
fn test_mkdir_parents_mode_only_on_target() {
    let sb = Sandbox::new();
    let target = sb.arg("outer/inner");
    assert_eq!(sb.run(&argv(&["mkdir", "-p", "-m", "500", &target])).0, 0);

    let inner = fs::metadata(sb.path("outer/inner")).unwrap().permissions().mode();
    assert_eq!(inner & 0o777, 0o500);
    // The parent keeps the default mode, so it stays writable.
    let outer = fs::metadata(sb.path("outer")).unwrap().permissions().mode();
    assert_ne!(outer & 0o777, 0o500);
    assert_ne!(outer & 0o200, 0);
}

#[test]
fn test_touch() {
    let sb = Sandbox::new();
    let file = sb.arg("new");
    assert_eq!(sb.run(&argv(&["touch", &file])).0, 0);
    assert!(sb.path("new").is_file());

    let skipped = sb.arg("skipped");
    assert_eq!(sb.run(&argv(&["touch", "-c", &skipped])).0, 0);
    assert!(!sb.path("skipped").exists());
}

#[test]
fn test_truncate() {
    let sb = Sandbox::new();
    let file = sb.arg("data");
    fs::write(sb.path("data"), "0123456789").unwrap();

    assert_eq!(sb.run(&argv(&["truncate", "-s", "4", &file])).0, 0);
    assert_eq!(fs::read(sb.path("data")).unwrap(), b"0123");

    assert_eq!(sb.run(&argv(&["truncate", "-s", "+2", &file])).0, 0);
    assert_eq!(fs::metadata(sb.path("data")).unwrap().len(), 6);

    assert_eq!(sb.run(&argv(&["truncate", "-s", "1K", &sb.arg("kb")])).0, 0);
    assert_eq!(fs::metadata(sb.path("kb")).unwrap().len(), 1024);

    assert_eq!(sb.run(&argv(&["truncate", &file])).0, 1);
}

#[test]
fn test_link_and_unlink() {
    let sb = Sandbox::new();
    fs::write(sb.path("orig"), "x").unwrap();
    let (orig, copy) = (sb.arg("orig"), sb.arg("copy"));

    assert_eq!(sb.run(&argv(&["link", &orig, &copy])).0, 0);
    assert_eq!(fs::read_to_string(sb.path("copy")).unwrap(), "x");

    assert_eq!(sb.run(&argv(&["unlink", &copy])).0, 0);
    assert!(!sb.path("copy").exists());
    assert_eq!(sb.run(&argv(&["unlink", &copy])).0, 1);
}

#[test]
fn test_ln() {
    let sb = Sandbox::new();
    fs::write(sb.path("target"), "t").unwrap();
    fs::create_dir(sb.path("dir")).unwrap();
    let (target, link) = (sb.arg("target"), sb.arg("link"));

    assert_eq!(sb.run(&argv(&["ln", "-s", &target, &link])).0, 0);
    assert_eq!(fs::read_link(sb.path("link")).unwrap(), sb.path("target"));

    // Existing link name without -f fails, with -f it is replaced.
    assert_eq!(sb.run(&argv(&["ln", "-s", "elsewhere", &link])).0, 1);
    assert_eq!(sb.run(&argv(&["ln", "-sf", "elsewhere", &link])).0, 0);
    assert_eq!(fs::read_link(sb.path("link")).unwrap(), Path::new("elsewhere"));

    // A directory destination gets the target's file name.
    assert_eq!(sb.run(&argv(&["ln", &target, &sb.arg("dir")])).0, 0);
    assert_eq!(fs::read_to_string(sb.path("dir/target")).unwrap(), "t");
}

#[test]
fn test_rm() {
    let sb = Sandbox::new();
    fs::create_dir_all(sb.path("tree/sub")).unwrap();
    fs::write(sb.path("tree/sub/file"), "").unwrap();
    fs::write(sb.path("plain"), "").unwrap();
    let tree = sb.arg("tree");

    let (code, _, stderr) = sb.run(&argv(&["rm", &tree]));
    assert_eq!(code, 1);
    assert_eq!(stderr, format!("rm: cannot remove '{}': Is a directory\n", tree));

    assert_eq!(sb.run(&argv(&["rm", "-r", &tree])).0, 0);
    assert!(!sb.path("tree").exists());

    assert_eq!(sb.run(&argv(&["rm", &sb.arg("plain")])).0, 0);
    assert_eq!(sb.run(&argv(&["rm", &sb.arg("plain")])).0, 1);
    assert_eq!(sb.run(&argv(&["rm", "-f", &sb.arg("plain")])).0, 0);
    assert_eq!(sb.run(&argv(&["rm", "-f"])).0, 0);

    let (code, _, stderr) = sb.run(&argv(&["rm", "-rf", ".."]));
    assert_eq!(code, 1);
    assert!(stderr.contains("refusing to remove"));
}

#[test]
fn test_readlink_and_realpath() {
    let sb = Sandbox::new();
    fs::write(sb.path("real"), "").unwrap();
    std::os::unix::fs::symlink(sb.path("real"), sb.path("alias")).unwrap();
    let canonical = fs::canonicalize(sb.path("real")).unwrap();

    let (code, stdout, _) = sb.run(&argv(&["readlink", &sb.arg("alias")]));
    assert_eq!((code, stdout), (0, format!("{}\n", sb.arg("real"))));

    let (code, stdout, _) = sb.run(&argv(&["readlink", "-f", &sb.arg("alias")]));
    assert_eq!((code, stdout), (0, format!("{}\n", canonical.display())));

    // Not a symlink: fail without a message.
    let (code, stdout, stderr) = sb.run(&argv(&["readlink", &sb.arg("real")]));
    assert_eq!((code, stdout.as_str(), stderr.as_str()), (1, "", ""));

    let (code, stdout, _) = sb.run(&argv(&["realpath", &sb.arg("alias")]));
    assert_eq!((code, stdout), (0, format!("{}\n", canonical.display())));

    let (code, stdout, _) = sb.run(&argv(&["realpath", &sb.arg("missing")]));
    let expected = fs::canonicalize(sb.dir.path()).unwrap().join("missing");
    assert_eq!((code, stdout), (0, format!("{}\n", expected.display())));
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

fn set_mode(path: &Path, mode: u32) {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

#[test]
fn test_chmod() {
    let sb = Sandbox::new();
    let file = sb.path("f");
    fs::write(&file, "x").unwrap();
    set_mode(&file, 0o644);

    assert_eq!(sb.run(&argv(&["chmod", "755", &sb.arg("f")])).0, 0);
    assert_eq!(mode_of(&file), 0o755);

    assert_eq!(sb.run(&argv(&["chmod", "go-rx,u-w", &sb.arg("f")])).0, 0);
    assert_eq!(mode_of(&file), 0o500);

    let (code, stdout, _) = sb.run(&argv(&["chmod", "-v", "a=r", &sb.arg("f")]));
    assert_eq!(code, 0);
    assert_eq!(
        stdout,
        format!(
            "mode of '{}' changed from 0500 (r-x------) to 0444 (r--r--r--)\n",
            sb.arg("f")
        )
    );

    // -c stays quiet when nothing changes
    let (code, stdout, _) = sb.run(&argv(&["chmod", "-c", "444", &sb.arg("f")]));
    assert_eq!((code, stdout.as_str()), (0, ""));

    let (code, _, stderr) = sb.run(&argv(&["chmod", "u+q", &sb.arg("f")]));
    assert_eq!(code, 1);
    assert_eq!(stderr, "chmod: invalid mode: 'u+q'\n");

    let (code, _, stderr) = sb.run(&argv(&["chmod", "644", &sb.arg("missing")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("chmod: cannot access"));
}

#[test]
fn test_chmod_recursive() {
    let sb = Sandbox::new();
    fs::create_dir_all(sb.path("tree/sub")).unwrap();
    fs::write(sb.path("tree/sub/file"), "").unwrap();
    set_mode(&sb.path("tree/sub/file"), 0o600);

    assert_eq!(sb.run(&argv(&["chmod", "-R", "go+rX", &sb.arg("tree")])).0, 0);
    assert_eq!(mode_of(&sb.path("tree/sub/file")), 0o644);
    assert_eq!(mode_of(&sb.path("tree/sub")) & 0o055, 0o055);
}

#[test]
fn test_chown_and_chgrp() {
    let sb = Sandbox::new();
    let file = sb.path("f");
    fs::write(&file, "").unwrap();
    let meta = fs::metadata(&file).unwrap();
    let (uid, gid) = (meta.uid().to_string(), meta.gid().to_string());

    // Handing a file to its current owner always succeeds.
    let spec = format!("{}:{}", uid, gid);
    let (code, stdout, _) = sb.run(&argv(&["chown", "-v", &spec, &sb.arg("f")]));
    assert_eq!(code, 0);
    assert_eq!(stdout, format!("ownership of '{}' set to {}\n", sb.arg("f"), spec));

    assert_eq!(sb.run(&argv(&["chgrp", &gid, &sb.arg("f")])).0, 0);
    assert_eq!(fs::metadata(&file).unwrap().gid().to_string(), gid);

    let (code, _, stderr) = sb.run(&argv(&["chown", "no-such-user-x", &sb.arg("f")]));
    assert_eq!(code, 1);
    assert_eq!(stderr, "chown: invalid user: 'no-such-user-x'\n");

    let (code, _, stderr) = sb.run(&argv(&["chgrp", "no-such-group-x", &sb.arg("f")]));
    assert_eq!(code, 1);
    assert_eq!(stderr, "chgrp: invalid group: 'no-such-group-x'\n");

    let (code, _, stderr) = sb.run(&argv(&["chown", &uid, &sb.arg("missing")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("chown: changing ownership of"));
}

#[test]
fn test_cp() {
    let sb = Sandbox::new();
    fs::write(sb.path("src"), "payload").unwrap();
    set_mode(&sb.path("src"), 0o640);

    let (code, stdout, _) = sb.run(&argv(&["cp", "-v", &sb.arg("src"), &sb.arg("dst")]));
    assert_eq!(code, 0);
    assert_eq!(stdout, format!("'{}' -> '{}'\n", sb.arg("src"), sb.arg("dst")));
    assert_eq!(fs::read_to_string(sb.path("dst")).unwrap(), "payload");
    assert_eq!(mode_of(&sb.path("dst")), 0o640);

    // Into a directory, keeping the timestamps with -p.
    fs::create_dir(sb.path("dir")).unwrap();
    let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
    fs::File::options()
        .write(true)
        .open(sb.path("src"))
        .unwrap()
        .set_modified(old)
        .unwrap();
    assert_eq!(sb.run(&argv(&["cp", "-p", &sb.arg("src"), &sb.arg("dir")])).0, 0);
    let copied = fs::metadata(sb.path("dir/src")).unwrap();
    assert_eq!(copied.modified().unwrap(), old);

    let (code, _, stderr) = sb.run(&argv(&["cp", &sb.arg("dir"), &sb.arg("copy")]));
    assert_eq!(code, 1);
    assert_eq!(stderr, format!("cp: '{}' is a directory (not copied)\n", sb.arg("dir")));

    assert_eq!(sb.run(&argv(&["cp", "-r", &sb.arg("dir"), &sb.arg("copy")])).0, 0);
    assert_eq!(fs::read_to_string(sb.path("copy/src")).unwrap(), "payload");

    let (code, _, stderr) = sb.run(&argv(&["cp", &sb.arg("src")]));
    assert_eq!(code, 1);
    assert!(stderr.contains("missing destination file operand"));
}

#[test]
fn test_mv() {
    let sb = Sandbox::new();
    fs::write(sb.path("a"), "first").unwrap();
    fs::write(sb.path("b"), "second").unwrap();
    fs::create_dir(sb.path("dir")).unwrap();

    let (code, stdout, _) = sb.run(&argv(&["mv", "-v", &sb.arg("a"), &sb.arg("c")]));
    assert_eq!(code, 0);
    assert_eq!(stdout, format!("renamed '{}' -> '{}'\n", sb.arg("a"), sb.arg("c")));
    assert!(!sb.path("a").exists());
    assert_eq!(fs::read_to_string(sb.path("c")).unwrap(), "first");

    // -n leaves an existing target alone
    assert_eq!(sb.run(&argv(&["mv", "-n", &sb.arg("b"), &sb.arg("c")])).0, 0);
    assert_eq!(fs::read_to_string(sb.path("c")).unwrap(), "first");
    assert!(sb.path("b").exists());

    assert_eq!(
        sb.run(&argv(&["mv", &sb.arg("b"), &sb.arg("c"), &sb.arg("dir")])).0,
        0
    );
    assert_eq!(fs::read_to_string(sb.path("dir/b")).unwrap(), "second");
    assert_eq!(fs::read_to_string(sb.path("dir/c")).unwrap(), "first");

    let (code, _, stderr) = sb.run(&argv(&["mv", &sb.arg("gone"), &sb.arg("x")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("mv: cannot move"));
}

#[test]
fn test_ls() {
    let sb = Sandbox::new();
    fs::write(sb.path("b.txt"), "hello").unwrap();
    fs::write(sb.path("a.sh"), "").unwrap();
    set_mode(&sb.path("a.sh"), 0o755);
    set_mode(&sb.path("b.txt"), 0o644);
    fs::write(sb.path(".hidden"), "").unwrap();
    fs::create_dir(sb.path("dir")).unwrap();
    let root = sb.dir.path().to_string_lossy().into_owned();

    let (code, stdout, _) = sb.run(&argv(&["ls", &root]));
    assert_eq!((code, stdout.as_str()), (0, "a.sh  b.txt  dir\n"));

    let (_, stdout, _) = sb.run(&argv(&["ls", "-a", &root]));
    assert_eq!(stdout, ".  ..  .hidden  a.sh  b.txt  dir\n");

    let (_, stdout, _) = sb.run(&argv(&["ls", "-AF1", &root]));
    assert_eq!(stdout, ".hidden\na.sh*\nb.txt\ndir/\n");

    let (_, stdout, _) = sb.run(&argv(&["ls", "-d", &root]));
    assert_eq!(stdout, format!("{}\n", root));

    let (code, stdout, _) = sb.run(&argv(&["ls", "-l", &root]));
    assert_eq!(code, 0);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].starts_with("total "));
    assert!(lines[1].starts_with("-rwxr-xr-x "));
    assert!(lines[1].ends_with(" a.sh"));
    assert!(lines[2].starts_with("-rw-r--r-- "));
    assert!(lines[2].contains(" 5 "));
    assert!(lines[3].starts_with('d'));

    let (code, stdout, stderr) = sb.run(&argv(&["ls", &sb.arg("missing"), &sb.arg("b.txt")]));
    assert_eq!(code, 1);
    assert_eq!(stdout, format!("{}\n", sb.arg("b.txt")));
    assert!(stderr.starts_with("ls: cannot access"));
}

#[test]
fn test_stat_format() {
    let sb = Sandbox::new();
    fs::write(sb.path("f"), "12345").unwrap();
    set_mode(&sb.path("f"), 0o640);
    fs::create_dir(sb.path("d")).unwrap();

    let (code, stdout, _) = sb.run(&argv(&["stat", "-c", "%s %a %A %F", &sb.arg("f")]));
    assert_eq!((code, stdout.as_str()), (0, "5 640 -rw-r----- regular file\n"));

    let (_, stdout, _) = sb.run(&argv(&["stat", "-c", "%F|%n", &sb.arg("d")]));
    assert_eq!(stdout, format!("directory|{}\n", sb.arg("d")));

    let (code, stdout, _) = sb.run(&argv(&["stat", &sb.arg("f")]));
    assert_eq!(code, 0);
    assert!(stdout.contains("Size: 5"));

    let (code, _, stderr) = sb.run(&argv(&["stat", &sb.arg("missing")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("stat: cannot stat"));
}

#[test]
fn test_du_and_df() {
    let sb = Sandbox::new();
    fs::create_dir(sb.path("d")).unwrap();
    fs::write(sb.path("d/data"), vec![b'x'; 10_000]).unwrap();

    let (code, stdout, _) = sb.run(&argv(&["du", "-s", &sb.arg("d")]));
    assert_eq!(code, 0);
    let (size, path) = stdout.trim_end().split_once('\t').unwrap();
    assert_eq!(path, sb.arg("d"));
    assert!(size.parse::<u64>().unwrap() >= 8);

    let (_, stdout, _) = sb.run(&argv(&["du", "-a", &sb.arg("d")]));
    assert_eq!(stdout.lines().count(), 2);

    let (code, _, stderr) = sb.run(&argv(&["du", &sb.arg("missing")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("du: cannot access"));

    let (code, stdout, _) = sb.run(&argv(&["df", "/"]));
    assert_eq!(code, 0);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Filesystem"));
    assert!(lines[0].ends_with("Mounted on"));
    assert!(lines[1].ends_with(" /"));
}

#[test]
fn test_fsync() {
    let sb = Sandbox::new();
    fs::write(sb.path("f"), "x").unwrap();
    assert_eq!(sb.run(&argv(&["fsync", &sb.arg("f")])).0, 0);
    assert_eq!(sb.run(&argv(&["fsync", "-d", &sb.arg("f")])).0, 0);

    let (code, _, stderr) = sb.run(&argv(&["fsync", &sb.arg("missing")]));
    assert_eq!(code, 1);
    assert!(stderr.starts_with("fsync: "));
}

#[test]
fn test_mktemp() {
    let sb = Sandbox::new();
    let dir = sb.dir.path().to_string_lossy().into_owned();

    let (code, stdout, _) = sb.run(&argv(&["mktemp", "-p", &dir]));
    assert_eq!(code, 0);
    let file = PathBuf::from(stdout.trim_end());
    assert!(file.starts_with(sb.dir.path()));
    assert!(file.file_name().unwrap().to_string_lossy().starts_with("tmp."));
    assert!(file.is_file());
    assert_eq!(mode_of(&file), 0o600);

    let (code, stdout, _) = sb.run(&argv(&["mktemp", "-d", &sb.arg("work.XXXX")]));
    assert_eq!(code, 0);
    let made = PathBuf::from(stdout.trim_end());
    assert!(made.is_dir());
    assert_eq!(mode_of(&made), 0o700);

    let (code, stdout, _) = sb.run(&argv(&["mktemp", "-u", &sb.arg("dry.XXXXXX")]));
    assert_eq!(code, 0);
    assert!(!Path::new(stdout.trim_end()).exists());

    let (code, _, stderr) = sb.run(&argv(&["mktemp", &sb.arg("fewXX")]));
    assert_eq!(code, 1);
    assert!(stderr.contains("too few X's"));

    let (code, stdout, stderr) = sb.run(&argv(&["mktemp", "-q", &sb.arg("fewXX")]));
    assert_eq!((code, stdout.as_str(), stderr.as_str()), (1, "", ""));
}
