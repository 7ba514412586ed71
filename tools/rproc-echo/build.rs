use miette::{IntoDiagnostic, Result, WrapErr};
use std::{env, path::PathBuf};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");

    // the built-in config, used unless `--config` names another one
    let config = {
        let root = env::var("CARGO_MANIFEST_DIR")
            .into_diagnostic()
            .context("No CARGO_MANIFEST_DIR")?;
        PathBuf::from(root).join("../../configs/ci40-echo.toml")
    };
    rproc_config::buildtime::render_file(config)
}
