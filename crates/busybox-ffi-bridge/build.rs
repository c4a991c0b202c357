//! Build script for busybox-ffi-bridge crate.
//!
//! When the `busybox-link` feature is enabled this tells cargo where to find
//! libbusybox and how to link it. Without the feature nothing is linked and
//! the safe wrappers report `FfiError::NotLinked`.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=BUSYBOX_LIB_DIR");
    println!("cargo:rerun-if-env-changed=BUSYBOX_STATIC");

    if env::var_os("CARGO_FEATURE_BUSYBOX_LINK").is_none() {
        return;
    }

    if let Some(dir) = env::var_os("BUSYBOX_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }

    let kind = match env::var("BUSYBOX_STATIC").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => "static",
        _ => "dylib",
    };
    println!("cargo:rustc-link-lib={}=busybox", kind);
}
