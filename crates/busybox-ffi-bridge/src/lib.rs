//! FFI bridge between rustybox and libbusybox.
//!
//! This crate is the glue layer between the Rust applets and the BusyBox C
//! code. It enables:
//!
//! - Rust code to call BusyBox applet mains directly (`echo_main`,
//!   `pwd_main`, `true_main`, `false_main`, `ash_main`) and BusyBox's own
//!   multi-call entry (`lbb_main`)
//! - A patched BusyBox ash to call back into Rust and run rustybox commands
//!   as NOFORK built-ins
//!
//! ```text
//! [rustybox registry] --run_applet--> lbb_prepare + <applet>_main
//! [rustybox sh]       --run_applet--> ash_main
//!                                        |
//! [ash built-ins]    <--rustybox_dispatch-+
//! ```
//!
//! # Linking
//!
//! The extern declarations are only compiled with the `busybox-link`
//! feature. Without it every wrapper returns [`FfiError::NotLinked`], so the
//! rest of the workspace builds and tests without libbusybox present.
//!
//! # Safety
//!
//! 1. argv is marshaled into owned, NULL-terminated buffers that outlive the call
//! 2. `lbb_prepare` always runs before an applet main
//! 3. Calls into libbusybox are serialized behind one process-wide lock
//! 4. Pointers received from C are NULL-checked before use

mod busybox_bridge;
mod exports;

pub use busybox_bridge::*;
pub use exports::*;
