//! FFI bindings to call BusyBox applet entry points from Rust.
//!
//! libbusybox exports each applet's `<name>_main(argc, argv)` along with the
//! `lbb_prepare`/`lbb_main` pair its own multi-call binary uses to set up
//! per-applet globals. The wrappers here marshal Rust arguments into a C
//! `argv`, run `lbb_prepare` first and then the applet main, and hand the
//! exit code back unchanged.

#[cfg(feature = "busybox-link")]
use std::ffi::c_int;
use std::ffi::{c_char, CStr};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use thiserror::Error;

/// Error type for FFI operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfiError {
    #[error("argv must contain at least the applet name")]
    EmptyArgv,

    #[error("argument contains an interior NUL byte: {arg:?}")]
    InteriorNul { arg: String },

    #[error("too many arguments for a C argv: {count}")]
    TooManyArguments { count: usize },

    #[error("libbusybox is not linked into this build")]
    NotLinked,

    #[error("BusyBox call lock poisoned by an earlier panic")]
    LockPoisoned,
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

// =============================================================================
// BusyBox function declarations (extern "C")
// =============================================================================

// Linked against libbusybox.so / libbusybox.a (see build.rs). All symbols are
// built with default visibility on the BusyBox side.
#[cfg(feature = "busybox-link")]
extern "C" {
    fn echo_main(argc: c_int, argv: *mut *mut c_char) -> c_int;
    fn pwd_main(argc: c_int, argv: *mut *mut c_char) -> c_int;
    fn true_main(argc: c_int, argv: *mut *mut c_char) -> c_int;
    fn false_main(argc: c_int, argv: *mut *mut c_char) -> c_int;
    fn ash_main(argc: c_int, argv: *mut *mut c_char) -> c_int;

    // Multi-call initialization
    fn lbb_prepare(applet: *const c_char, argv: *mut *mut c_char);
    fn lbb_main(argv: *mut *mut c_char) -> c_int;
}

#[cfg(feature = "busybox-link")]
type AppletMain = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

/// BusyBox keeps applet state in process-wide globals, so only one call may
/// be inside libbusybox at a time.
static BUSYBOX_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

// =============================================================================
// Applet table
// =============================================================================

/// Applets whose entry points are declared by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BusyBoxApplet {
    Echo,
    Pwd,
    True,
    False,
    Ash,
}

impl BusyBoxApplet {
    const ALL: [BusyBoxApplet; 5] = [
        BusyBoxApplet::Echo,
        BusyBoxApplet::Pwd,
        BusyBoxApplet::True,
        BusyBoxApplet::False,
        BusyBoxApplet::Ash,
    ];

    /// Returns every bridged applet.
    pub fn all() -> &'static [BusyBoxApplet] {
        &Self::ALL
    }

    /// Returns the applet name as BusyBox knows it.
    pub fn name(&self) -> &'static str {
        match self {
            BusyBoxApplet::Echo => "echo",
            BusyBoxApplet::Pwd => "pwd",
            BusyBoxApplet::True => "true",
            BusyBoxApplet::False => "false",
            BusyBoxApplet::Ash => "ash",
        }
    }

    /// Returns the applet name as a C string for `lbb_prepare`.
    pub fn c_name(&self) -> &'static CStr {
        match self {
            BusyBoxApplet::Echo => c"echo",
            BusyBoxApplet::Pwd => c"pwd",
            BusyBoxApplet::True => c"true",
            BusyBoxApplet::False => c"false",
            BusyBoxApplet::Ash => c"ash",
        }
    }

    /// Looks up a bridged applet by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|applet| applet.name() == name)
    }

    #[cfg(feature = "busybox-link")]
    fn entry_point(&self) -> AppletMain {
        match self {
            BusyBoxApplet::Echo => echo_main,
            BusyBoxApplet::Pwd => pwd_main,
            BusyBoxApplet::True => true_main,
            BusyBoxApplet::False => false_main,
            BusyBoxApplet::Ash => ash_main,
        }
    }
}

// =============================================================================
// argv marshaling
// =============================================================================

/// Owned, NULL-terminated C argument vector.
///
/// Each argument lives in its own heap buffer that stays put for the life of
/// the `CArgv`. BusyBox is free to permute the pointer array (getopt does) or
/// scribble inside the strings; the buffers are released by length, not by
/// `strlen`, so either is harmless.
#[derive(Debug)]
pub struct CArgv {
    buffers: Vec<Box<[u8]>>,
    pointers: Vec<*mut c_char>,
    argc: i32,
}

impl CArgv {
    /// Marshals `args` into a C argv. `args[0]` is the program name.
    pub fn new<S: AsRef<str>>(args: &[S]) -> FfiResult<Self> {
        if args.is_empty() {
            return Err(FfiError::EmptyArgv);
        }
        let argc = i32::try_from(args.len())
            .map_err(|_| FfiError::TooManyArguments { count: args.len() })?;

        let mut buffers = Vec::with_capacity(args.len());
        for arg in args {
            let arg = arg.as_ref();
            if arg.as_bytes().contains(&0) {
                return Err(FfiError::InteriorNul {
                    arg: arg.to_string(),
                });
            }
            let mut bytes = Vec::with_capacity(arg.len() + 1);
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
            buffers.push(bytes.into_boxed_slice());
        }

        let mut pointers: Vec<*mut c_char> = buffers
            .iter_mut()
            .map(|buf| buf.as_mut_ptr().cast::<c_char>())
            .collect();
        pointers.push(std::ptr::null_mut());

        Ok(Self {
            buffers,
            pointers,
            argc,
        })
    }

    /// Returns the number of arguments (not counting the NULL terminator).
    pub fn argc(&self) -> i32 {
        self.argc
    }

    /// Returns the `char **argv` pointer handed to C.
    pub fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.pointers.as_mut_ptr()
    }

    /// Returns the original arguments as C strings, in order.
    pub fn args(&self) -> impl Iterator<Item = &CStr> {
        self.buffers.iter().filter_map(|buf| CStr::from_bytes_until_nul(buf).ok())
    }

    /// Returns true if the last pointer slot is NULL.
    pub fn is_null_terminated(&self) -> bool {
        self.pointers.last().is_some_and(|p| p.is_null())
    }
}

// =============================================================================
// Safe Rust wrappers for BusyBox functions
// =============================================================================

/// Returns true when this build links against libbusybox.
pub fn is_linked() -> bool {
    cfg!(feature = "busybox-link")
}

/// Runs a bridged applet: `lbb_prepare(name, argv)` then `<name>_main(argc, argv)`.
///
/// `args[0]` should be the applet name. Returns the applet's exit code. Note
/// that BusyBox may call `exit()` itself on fatal errors, in which case this
/// never returns.
pub fn run_applet<S: AsRef<str>>(applet: BusyBoxApplet, args: &[S]) -> FfiResult<i32> {
    let mut argv = CArgv::new(args)?;
    invoke_applet(applet, &mut argv)
}

/// Runs BusyBox's own multi-call entry (`lbb_main`), which picks the applet
/// from `args[0]`.
pub fn run_multicall<S: AsRef<str>>(args: &[S]) -> FfiResult<i32> {
    let mut argv = CArgv::new(args)?;
    invoke_multicall(&mut argv)
}

#[cfg(feature = "busybox-link")]
fn invoke_applet(applet: BusyBoxApplet, argv: &mut CArgv) -> FfiResult<i32> {
    use std::io::Write;

    let _guard = BUSYBOX_LOCK.lock().map_err(|_| FfiError::LockPoisoned)?;
    log::debug!("Calling {}_main with argc={}", applet.name(), argv.argc());

    // Rust and C keep separate stdout buffers; drain ours first and theirs after.
    let _ = std::io::stdout().flush();
    // Safety: argv is a valid NULL-terminated vector that outlives the call,
    // the applet name is a static C string, and the lock keeps BusyBox
    // globals single-threaded.
    let code = unsafe {
        lbb_prepare(applet.c_name().as_ptr(), argv.as_mut_ptr());
        let code = (applet.entry_point())(argv.argc(), argv.as_mut_ptr());
        libc::fflush(std::ptr::null_mut());
        code
    };

    log::debug!("{}_main returned {}", applet.name(), code);
    Ok(code)
}

#[cfg(not(feature = "busybox-link"))]
fn invoke_applet(applet: BusyBoxApplet, _argv: &mut CArgv) -> FfiResult<i32> {
    let _guard = BUSYBOX_LOCK.lock().map_err(|_| FfiError::LockPoisoned)?;
    log::warn!(
        "run_applet({}) called without busybox-link feature",
        applet.name()
    );
    Err(FfiError::NotLinked)
}

#[cfg(feature = "busybox-link")]
fn invoke_multicall(argv: &mut CArgv) -> FfiResult<i32> {
    use std::io::Write;

    let _guard = BUSYBOX_LOCK.lock().map_err(|_| FfiError::LockPoisoned)?;
    log::debug!("Calling lbb_main with argc={}", argv.argc());

    let _ = std::io::stdout().flush();
    // Safety: same invariants as invoke_applet.
    let code = unsafe {
        let code = lbb_main(argv.as_mut_ptr());
        libc::fflush(std::ptr::null_mut());
        code
    };
    Ok(code)
}

#[cfg(not(feature = "busybox-link"))]
fn invoke_multicall(_argv: &mut CArgv) -> FfiResult<i32> {
    log::warn!("run_multicall called without busybox-link feature");
    Err(FfiError::NotLinked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cargv_layout() {
        let argv = CArgv::new(&["echo", "hi"]).unwrap();
        assert_eq!(argv.argc(), 2);
        assert!(argv.is_null_terminated());

        let args: Vec<_> = argv.args().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, vec!["echo", "hi"]);
    }

    #[test]
    fn test_cargv_pointer_contents() {
        let mut argv = CArgv::new(&["pwd"]).unwrap();
        let ptr = argv.as_mut_ptr();
        // Safety: ptr points at two slots, a string and the terminator.
        unsafe {
            assert_eq!(CStr::from_ptr(*ptr).to_str().unwrap(), "pwd");
            assert!((*ptr.add(1)).is_null());
        }
    }

    #[test]
    fn test_cargv_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(CArgv::new(&empty).unwrap_err(), FfiError::EmptyArgv);
    }

    #[test]
    fn test_cargv_interior_nul() {
        let err = CArgv::new(&["echo", "a\0b"]).unwrap_err();
        assert_eq!(
            err,
            FfiError::InteriorNul {
                arg: "a\0b".to_string()
            }
        );
    }

    #[test]
    fn test_applet_names() {
        for applet in BusyBoxApplet::all() {
            assert_eq!(BusyBoxApplet::from_name(applet.name()), Some(*applet));
            assert_eq!(applet.c_name().to_str().unwrap(), applet.name());
        }
        assert_eq!(BusyBoxApplet::from_name("cat"), None);
    }

    #[cfg(not(feature = "busybox-link"))]
    #[test]
    fn test_stub_without_link() {
        assert!(!is_linked());
        assert_eq!(
            run_applet(BusyBoxApplet::True, &["true"]),
            Err(FfiError::NotLinked)
        );
        assert_eq!(run_multicall(&["echo", "hi"]), Err(FfiError::NotLinked));
    }

    #[test]
    fn test_marshal_errors_win_over_link_state() {
        let empty: [&str; 0] = [];
        assert_eq!(
            run_applet(BusyBoxApplet::Echo, &empty),
            Err(FfiError::EmptyArgv)
        );
    }
}
