//! # Remote processor configuration
//!
//! This crate is used by firmware and host tool crates in two ways:
//!
//! ## In a `build.rs` script
//!
//! ```toml
//! [build-dependencies]
//! rproc-config = { path = "../../source/config", features = ["use-std"] }
//! ```
//!
//! And render the board's config file with [`buildtime::render_file`]:
//!
//! ```rust,ignore
//! use rproc_config::buildtime::render_file;
//! fn main() {
//!     render_file("../../configs/ci40-echo.toml").unwrap();
//! }
//! ```
//!
//! ## In the crate itself
//!
//! Include this crate *again* as a normal dependency, and load the rendered
//! config:
//!
//! ```rust,ignore
//! let config = rproc_config::include_config!().unwrap();
//! let mode = config.firmware.mode;
//! ```

#![cfg_attr(not(any(feature = "use-std", test)), no_std)]

use firmware::FirmwareSettings;
use serde::{Deserialize, Serialize};

/// The top level configuration type.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RprocConfig {
    #[serde(default)]
    pub firmware: FirmwareSettings,
}

/// Set by [`buildtime::render_file`] to the path of the rendered config.
pub const CONFIG_FILE_VAR: &str = "RPROC_CONFIG";

/// Tools intended for use in build.rs scripts and host tools.
#[cfg(feature = "use-std")]
pub mod buildtime {
    const OUT_DIR: &str = "OUT_DIR";
    const TAG: &str = concat!(module_path!(), ":");

    use std::{env, fs, path::Path};

    use super::*;
    use miette::{Context, IntoDiagnostic, Result};

    /// Parse a config from TOML.
    pub fn from_toml(s: &str) -> Result<RprocConfig> {
        toml::from_str(s).into_diagnostic()
    }

    /// Read and parse a TOML config file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<RprocConfig> {
        let path = path.as_ref();
        let cfg = fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read config file '{}'", path.display()))?;
        from_toml(&cfg).wrap_err_with(|| format!("Failed to parse config file '{}'", path.display()))
    }

    pub fn to_postcard(cfg: &RprocConfig) -> Result<Vec<u8>> {
        postcard::to_stdvec(cfg).into_diagnostic()
    }

    /// Render a configuration file into the cargo `OUT_DIR`, where
    /// [`include_config!()`](crate::include_config) will find it.
    pub fn render_file(path: impl AsRef<Path>) -> Result<()> {
        let out_dir = env::var(OUT_DIR)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read '{OUT_DIR}' env variable"))?;
        eprintln!("{TAG} {OUT_DIR}='{out_dir}'");
        render_file_to(path, out_dir)
    }

    fn render_file_to(path: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path_disp = path.display();

        (|| {
            let filename = path
                .file_name()
                .ok_or_else(|| miette::miette!("Path has no filename!"))?;
            eprintln!("{TAG} rendering config file '{path_disp}'");
            let cfg = load_file(path)?;

            let mut out = out.as_ref().join(filename);
            out.set_extension("postcard");
            fs::write(&out, to_postcard(&cfg)?).into_diagnostic()?;
            println!("cargo:rustc-env={CONFIG_FILE_VAR}={}", out.display());
            println!("cargo:rerun-if-changed={path_disp}");

            Ok::<_, miette::Report>(())
        })()
        .wrap_err_with(|| format!("Failed to render config file '{path_disp}'"))
    }

}

/// Tools intended for use at runtime
pub mod runtime {
    use crate::RprocConfig;

    #[derive(Debug, PartialEq)]
    pub enum Error {
        Postcard(postcard::Error),
    }

    pub fn from_postcard(s: &[u8]) -> Result<RprocConfig, Error> {
        postcard::from_bytes(s).map_err(Error::Postcard)
    }

    impl core::fmt::Display for Error {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            match self {
                Error::Postcard(e) => write!(f, "invalid rendered config: {e}"),
            }
        }
    }

}

/// Load the configuration rendered by [`buildtime::render_file`] in a
/// build.rs.
#[macro_export]
macro_rules! include_config {
    () => {{
        const RPROC_CONFIG: &[u8] = include_bytes!(env!("RPROC_CONFIG"));
        $crate::runtime::from_postcard(RPROC_CONFIG)
    }};
}
