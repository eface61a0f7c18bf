use std::env;
use std::path::{Path, PathBuf};

const WATCHED_VARIABLES: &[&str] =
    &["FFMPEG_DIR", "PKG_CONFIG_PATH", "VCPKG_ROOT", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }

    // Linux and macOS builds rely on pkg-config; Windows needs an explicit prefix.
    if let Some(prefix) = env::var_os("FFMPEG_DIR") {
        warn_without_lame(Path::new(&prefix));
        return;
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=FFMPEG_DIR is not set. Install FFmpeg with `vcpkg install ffmpeg[mp3lame]` and point FFMPEG_DIR at the triplet directory."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let prefix: PathBuf = [vcpkg_root.as_str(), "installed", triplet.as_str()].iter().collect();
    if prefix.exists() {
        println!(
            "cargo:warning=Found a vcpkg FFmpeg at {}; set FFMPEG_DIR to it to silence this warning.",
            prefix.display()
        );
        warn_without_lame(&prefix);
    } else {
        println!("cargo:warning=No FFmpeg install under {}.", prefix.display());
    }
}

/// The MP3 encoder needs FFmpeg built against LAME.
fn warn_without_lame(prefix: &Path) {
    let candidates = ["mp3lame.lib", "libmp3lame.lib", "libmp3lame.a"];
    let lib = prefix.join("lib");
    if !candidates.iter().any(|name| lib.join(name).exists()) {
        println!(
            "cargo:warning=No LAME library under {}; frame encoding will fail at runtime without libmp3lame.",
            lib.display()
        );
    }
}
