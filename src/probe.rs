use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::catalog::PRODUCT_TAG;
use crate::version::{ParseError, VersionInfo};

/// Environment variable `go env` reports the installation root under.
const ROOT_VARIABLE: &str = "GOROOT";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot run {exe}: {source}")]
    Spawn {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{exe} {command} exited with {code:?}")]
    Status { exe: PathBuf, command: &'static str, code: Option<i32> },
    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: &'static str, output: String },
    #[error("cannot parse local version: {0}")]
    Version(#[from] ParseError),
    #[error("{0} not found in `go env` output")]
    MissingVariable(&'static str),
}

/// What the installed toolchain reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEnvironment {
    pub version: VersionInfo,
    pub platform: String,
    pub arch: String,
    pub install_root: PathBuf,
}

/// Introspection of an installed toolchain.
pub trait Probe {
    fn probe(&self, exe: &Path) -> Result<LocalEnvironment, ProbeError>;
}

/// Runs `go version` and `go env` on the given executable.
pub struct Toolchain;

impl Probe for Toolchain {
    fn probe(&self, exe: &Path) -> Result<LocalEnvironment, ProbeError> {
        let version_output = run(exe, "version")?;
        let (version, platform, arch) = parse_version_output(&version_output)?;
        let env_output = run(exe, "env")?;
        let install_root = parse_env_output(&env_output)?;
        Ok(LocalEnvironment { version, platform, arch, install_root })
    }
}

fn run(exe: &Path, command: &'static str) -> Result<String, ProbeError> {
    debug!("running \"{} {command}\"", exe.display());
    let output = Command::new(exe)
        .arg(command)
        .output()
        .map_err(|source| ProbeError::Spawn { exe: exe.to_path_buf(), source })?;
    if !output.status.success() {
        return Err(ProbeError::Status {
            exe: exe.to_path_buf(),
            command,
            code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `go version go1.18 linux/amd64` into version, OS and arch.
pub fn parse_version_output(output: &str) -> Result<(VersionInfo, String, String), ProbeError> {
    let unexpected = || ProbeError::UnexpectedOutput {
        command: "version",
        output: output.trim().to_string(),
    };

    let tokens: Vec<&str> = output.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(unexpected());
    }
    let version = tokens[2].strip_prefix(PRODUCT_TAG).ok_or_else(unexpected)?;
    let version = VersionInfo::parse(version)?;
    let (platform, arch) = tokens[3].split_once('/').ok_or_else(unexpected)?;
    if platform.is_empty() || arch.is_empty() {
        return Err(unexpected());
    }
    Ok((version, platform.to_string(), arch.to_string()))
}

/// Find the `GOROOT` assignment in `go env` output.
///
/// Handles `GOROOT="/usr/local/go"`, `GOROOT='/usr/local/go'` and the Windows
/// `set GOROOT=C:\Go` form.
pub fn parse_env_output(output: &str) -> Result<PathBuf, ProbeError> {
    for line in output.lines() {
        let line = line.trim();
        let line = line.strip_prefix("set ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != ROOT_VARIABLE {
            continue;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if value.is_empty() {
            break;
        }
        return Ok(PathBuf::from(value));
    }
    Err(ProbeError::MissingVariable(ROOT_VARIABLE))
}

/// Executable name inside an installation's `bin` directory.
pub fn exe_name() -> String {
    format!("go{}", std::env::consts::EXE_SUFFIX)
}

/// Where the official installers put the `go` binary.
pub fn default_install_bin() -> PathBuf {
    if std::env::consts::OS == "windows" {
        PathBuf::from(r"C:\Go\bin")
    } else {
        PathBuf::from("/usr/local/go/bin")
    }
}

/// Probe `primary`; on failure retry once against `fallback`.
///
/// Returns the executable that answered along with its environment.
pub fn probe_with_fallback(
    probe: &dyn Probe,
    primary: &Path,
    fallback: &Path,
) -> Result<(PathBuf, LocalEnvironment), ProbeError> {
    match probe.probe(primary) {
        Ok(env) => Ok((primary.to_path_buf(), env)),
        Err(e) => {
            debug!("probing {} failed ({e}); trying {}", primary.display(), fallback.display());
            let env = probe.probe(fallback)?;
            Ok((fallback.to_path_buf(), env))
        }
    }
}
