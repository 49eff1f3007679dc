use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::download::DEFAULT_DOWNLOAD_URL;
use crate::probe::{default_install_bin, exe_name};
use crate::select::SelectionPolicy;
use crate::Cli;

#[derive(Debug)]
pub struct UpgradeConfig {
    pub policy: SelectionPolicy,
    pub verbose: bool,
    pub assume_yes: bool, // --silent
    pub exe: PathBuf,          // from [PATH], else `go` on PATH
    pub fallback_exe: PathBuf, // default installation location
    pub catalog_url: String,   // GOUP_CATALOG_URL
    pub download_url: String,  // GOUP_DOWNLOAD_URL, with [version]/[os]/[arch]/[ext]
    pub no_progress: bool,     // GOUP_NO_PROGRESS=1
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is set but empty")]
    EmptyUrl { var: &'static str },
    #[error("GOUP_DOWNLOAD_URL must contain the {0} placeholder")]
    MissingPlaceholder(&'static str),
}

fn url_override(var: &'static str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(v) if v.trim().is_empty() => Err(ConfigError::EmptyUrl { var }),
        Ok(v) => Ok(v.trim().to_string()),
        Err(_) => Ok(default.to_string()),
    }
}

pub fn upgrade_config(cli: &Cli) -> Result<UpgradeConfig, ConfigError> {
    let catalog_url = url_override("GOUP_CATALOG_URL", DEFAULT_CATALOG_URL)?;
    let download_url = url_override("GOUP_DOWNLOAD_URL", DEFAULT_DOWNLOAD_URL)?;
    for placeholder in ["[version]", "[os]", "[arch]", "[ext]"] {
        if !download_url.contains(placeholder) {
            return Err(ConfigError::MissingPlaceholder(placeholder));
        }
    }

    let exe = match &cli.path {
        Some(p) if p.is_file() => p.clone(),
        Some(dir) => dir.join(exe_name()),
        None => which::which("go").unwrap_or_else(|_| PathBuf::from(exe_name())),
    };

    let no_progress = std::env::var("GOUP_NO_PROGRESS")
        .map(|v| v == "1")
        .unwrap_or(false);

    Ok(UpgradeConfig {
        policy: SelectionPolicy {
            include_beta: cli.beta,
            include_rc: cli.rc,
            allow_major_jump: cli.upgrade,
        },
        verbose: cli.verbose,
        assume_yes: cli.silent,
        exe,
        fallback_exe: default_install_bin().join(exe_name()),
        catalog_url,
        download_url,
        no_progress,
    })
}
