//! Progress observer shared by the download, extraction and replace stages.
//!
//! The core only talks to [`ProgressSink`]; the terminal rendering lives in
//! [`ConsoleProgress`] so tests can record events instead.

use std::path::PathBuf;
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::upgrade::UpgradeState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Download started; `total` is the declared content length if any.
    DownloadStarted { total: Option<u64> },
    DownloadAdvanced { bytes: u64 },
    DownloadFinished { bytes: u64 },
    /// A file was written by the extractor.
    Extracted { path: PathBuf },
    State(UpgradeState),
}

pub trait ProgressSink {
    fn on_progress(&self, event: ProgressEvent);
}

/// Byte progress bar for downloads; extracted files go to the debug log.
pub struct ConsoleProgress {
    hidden: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new(hidden: bool) -> Self {
        Self { hidden, bar: Mutex::new(None) }
    }

    fn start_bar(&self, total: Option<u64>) -> ProgressBar {
        if self.hidden {
            return ProgressBar::hidden();
        }
        match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                ) {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec})") {
                    bar.set_style(style);
                }
                bar
            }
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, event: ProgressEvent) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        match event {
            ProgressEvent::DownloadStarted { total } => {
                *slot = Some(self.start_bar(total));
            }
            ProgressEvent::DownloadAdvanced { bytes } => {
                if let Some(bar) = slot.as_ref() {
                    bar.inc(bytes);
                }
            }
            ProgressEvent::DownloadFinished { bytes } => {
                if let Some(bar) = slot.take() {
                    bar.finish_and_clear();
                }
                info!(bytes, "download completed");
            }
            ProgressEvent::Extracted { path } => debug!("extracted {}", path.display()),
            ProgressEvent::State(_) => {}
        }
    }
}
