//! Build script for caffe2-rs.
//!
//! Links the native Caffe2 predictor bridge (`libcaffe2_predictor`) when the
//! `caffe2` feature is enabled. Without it nothing is linked and the library
//! can only be driven through a caller-supplied `NativeRuntime`.
//!
//! # Environment Variables
//!
//! - `CAFFE2_HOME`: Caffe2 installation prefix (default: first of
//!   `/opt/caffe2`, `/usr/local` that contains `include/caffe2`)
//! - `CAFFE2_BRIDGE_DIR`: Directory holding `libcaffe2_predictor` (default:
//!   `$CAFFE2_HOME/lib`)
//! - `CUDA_HOME` / `CUDA_PATH`: CUDA toolkit, for `cuda` builds
//! - `CAFFE2_SKIP_LINK`: Set to "1" to skip linking (for development)

use std::env;
use std::path::{Path, PathBuf};

const BRIDGE_LIB: &str = "caffe2_predictor";

fn main() {
    println!("cargo:rerun-if-env-changed=CAFFE2_HOME");
    println!("cargo:rerun-if-env-changed=CAFFE2_BRIDGE_DIR");
    println!("cargo:rerun-if-env-changed=CAFFE2_SKIP_LINK");
    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    if env::var_os("CARGO_FEATURE_CAFFE2").is_none() {
        return;
    }
    link_caffe2_bridge();
}

/// Find the Caffe2 prefix from `CAFFE2_HOME` or well-known locations.
fn detect_caffe2_home() -> Option<PathBuf> {
    if let Ok(path) = env::var("CAFFE2_HOME") {
        return Some(PathBuf::from(path));
    }
    ["/opt/caffe2", "/usr/local"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join("include/caffe2").exists())
}

/// Whether `dir` contains a shared or static build of `lib`.
fn has_library(dir: &Path, lib: &str) -> bool {
    ["so", "dylib", "a"]
        .iter()
        .any(|ext| dir.join(format!("lib{}.{}", lib, ext)).exists())
}

fn link_caffe2_bridge() {
    if env::var("CAFFE2_SKIP_LINK")
        .map(|v| v == "1")
        .unwrap_or(false)
    {
        println!("cargo:warning=Skipping caffe2 bridge link (CAFFE2_SKIP_LINK=1)");
        return;
    }

    let caffe2_home = detect_caffe2_home().unwrap_or_else(|| {
        panic!(
            "Could not find a Caffe2 installation.\n\
             Checked: $CAFFE2_HOME, /opt/caffe2, /usr/local\n\
             \n\
             To fix, either:\n\
             1. Set CAFFE2_HOME to your Caffe2 install prefix\n\
             2. Build without the caffe2 feature: cargo build"
        )
    });
    if !caffe2_home.exists() {
        panic!(
            "Caffe2 path does not exist: {}\n\
             The CAFFE2_HOME environment variable points to a non-existent path.",
            caffe2_home.display()
        );
    }
    println!("cargo:rustc-env=CAFFE2_HOME={}", caffe2_home.display());

    let lib_dir = caffe2_home.join("lib");
    let bridge_dir = env::var("CAFFE2_BRIDGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| lib_dir.clone());

    if !has_library(&bridge_dir, BRIDGE_LIB) {
        println!(
            "cargo:warning=lib{} not found in {}; linking may fail",
            BRIDGE_LIB,
            bridge_dir.display()
        );
    }

    // The bridge pulls in Caffe2 itself through its own dependencies
    println!("cargo:rustc-link-search=native={}", bridge_dir.display());
    println!("cargo:rustc-link-lib=dylib={}", BRIDGE_LIB);
    println!("cargo:rustc-link-search=native={}", lib_dir.display());

    // Use RPATH (not RUNPATH) for reliable library discovery
    println!("cargo:rustc-link-arg=-Wl,--disable-new-dtags");
    println!("cargo:rustc-link-arg=-Wl,-rpath,{}", bridge_dir.display());
    if bridge_dir != lib_dir {
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
    }

    if env::var_os("CARGO_FEATURE_CUDA").is_some() {
        link_cuda();
    }
}

fn link_cuda() {
    // Find CUDA toolkit from CUDA_HOME, CUDA_PATH, or common paths
    let cuda_root = env::var("CUDA_HOME")
        .or_else(|_| env::var("CUDA_PATH"))
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            ["/opt/cuda", "/usr/local/cuda"]
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        });

    match cuda_root {
        Some(cuda) => {
            let lib64 = cuda.join("lib64");
            println!("cargo:rustc-link-search=native={}", lib64.display());
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib64.display());
            println!("cargo:rustc-link-lib=dylib=cudart");
        }
        None => println!("cargo:warning=cuda feature enabled but no CUDA toolkit found"),
    }
}
