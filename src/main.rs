// main.rs: arg parsing and orchestration only.
// All I/O lives in the modules below; main.rs wires them together in run order.
mod catalog;
mod config;
mod download;
mod extract;
mod fsutil;
mod probe;
mod progress;
mod select;
mod upgrade;
mod version;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use reqwest::blocking::Client;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use catalog::fetch_catalog;
use config::{upgrade_config, UpgradeConfig};
use download::{download, download_url};
use extract::extractor_for;
use probe::{probe_with_fallback, Toolchain};
use progress::ConsoleProgress;
use select::select_target;
use upgrade::{Installer, ReplacePlan, Replaced, UpgradeError};

/// Upgrade the local Go installation to the newest matching release.
#[derive(Debug, Parser)]
#[command(name = "goup", version)]
pub struct Cli {
    /// Print every command run and path touched.
    #[arg(short, long)]
    pub verbose: bool,

    /// Include betas. Implied when the local version is a beta.
    #[arg(short, long)]
    pub beta: bool,

    /// Include release candidates. Implied when the local version is a beta or RC.
    #[arg(short = 'c', long)]
    pub rc: bool,

    /// Download and upgrade without asking for confirmation.
    #[arg(short, long)]
    pub silent: bool,

    /// Move to the newest major/minor line instead of the newest build of the current one.
    #[arg(short, long)]
    pub upgrade: bool,

    /// Directory containing the go executable. If omitted, `go` on PATH is used,
    /// then the default installation directory.
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,
}

/// Log filter behind `--verbose` when `RUST_LOG` is unset.
pub(crate) const VERBOSE_FILTER: &str = "goup=debug";

fn init_logging(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(format!("goup/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Ask until the answer is y/Y or n/N. End of input counts as no.
fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    loop {
        write!(output, "Do you want to download and upgrade now (Y/n):")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(false);
        }
        match line.trim() {
            "Y" | "y" => return Ok(true),
            "N" | "n" => return Ok(false),
            _ => {}
        }
    }
}

fn run(config: &UpgradeConfig) -> anyhow::Result<()> {
    let (exe, local) = probe_with_fallback(&Toolchain, &config.exe, &config.fallback_exe)
        .context("cannot get local Go information")?;
    debug!(
        "local Go: version {}, os {}, arch {}, GOROOT {} ({})",
        local.version,
        local.platform,
        local.arch,
        local.install_root.display(),
        exe.display()
    );
    if local.install_root.parent().is_none() {
        bail!("refusing to replace GOROOT {}", local.install_root.display());
    }

    let client = http_client().context("cannot create HTTP client")?;
    let catalog = fetch_catalog(&client, &config.catalog_url).context("cannot retrieve version information")?;

    let Some(target) = select_target(&local.version, &catalog, config.policy) else {
        println!("[goup] no release matches Go {} with the selected options", local.version);
        return Ok(());
    };
    println!("[goup] latest version is {target}");
    if target == local.version {
        println!("[goup] your Go is at the latest version");
        return Ok(());
    }

    if !config.assume_yes && !confirm(&mut io::stdin().lock(), &mut io::stdout())? {
        return Ok(());
    }

    let extractor = extractor_for(&local.platform);
    let url = download_url(&config.download_url, &target, &local.platform, &local.arch, extractor.extension());
    let mut archive = tempfile::Builder::new()
        .prefix(&format!("go{target}{}{}", local.arch, local.platform))
        .suffix(&format!(".{}", extractor.extension()))
        .tempfile()
        .context("cannot create temporary file")?;
    debug!("download location: {}", archive.path().display());

    println!("[goup] downloading {url}");
    let progress = ConsoleProgress::new(config.no_progress);
    download(&client, &url)
        .and_then(|body| body.save_to(archive.as_file_mut(), &progress))
        .context("cannot download file")?;

    println!("[goup] backing up current Go and installing {target} to {}", local.install_root.display());
    let plan = ReplacePlan {
        install_root: local.install_root.clone(),
        archive: archive.path().to_path_buf(),
        exe,
        current: local.version,
        target,
    };
    match Installer::new(extractor.as_ref(), &Toolchain, &progress).replace(&plan) {
        Ok(Replaced::Installed) => {
            println!("[goup] Go upgraded to {target}");
            Ok(())
        }
        Ok(Replaced::RolledBack { cause }) => {
            bail!("upgrade to {target} failed, previous Go {} restored: {cause}", local.version)
        }
        Err(e @ UpgradeError::Removal { .. }) => {
            Err(e).context("cannot remove the existing Go directory; make sure goup runs with elevated permissions")
        }
        Err(e @ UpgradeError::Unrecoverable { .. }) => {
            Err(e).context("unrecoverable error, please consider reinstalling Go manually")
        }
        Err(e) => Err(e).context("upgrade aborted before the installation was changed"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match upgrade_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[goup] {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.verbose);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[goup] {e:#}");
            ExitCode::FAILURE
        }
    }
}
