use std::io::{self, Read, Write};

use reqwest::blocking::{Client, Response};
use thiserror::Error;
use tracing::debug;

use crate::progress::{ProgressEvent, ProgressSink};
use crate::version::VersionInfo;

pub const DEFAULT_DOWNLOAD_URL: &str = "https://dl.google.com/go/go[version].[os]-[arch].[ext]";

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("download of {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("error while saving download: {0}")]
    Io(#[from] io::Error),
}

/// Fill the `[version]`, `[os]`, `[arch]` and `[ext]` placeholders.
pub fn download_url(template: &str, version: &VersionInfo, os: &str, arch: &str, ext: &str) -> String {
    template
        .replace("[version]", &version.to_string())
        .replace("[os]", os)
        .replace("[arch]", arch)
        .replace("[ext]", ext)
}

/// An open archive stream and its declared size.
pub struct Download<R> {
    reader: R,
    pub total_size: Option<u64>,
}

/// Open `url`; the body is read later by [`Download::save_to`].
pub fn download(client: &Client, url: &str) -> Result<Download<Response>, DownloadError> {
    debug!("GET {url}");
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status { url: url.to_string(), status: status.as_u16() });
    }
    let total_size = response.content_length();
    debug!(?total_size, "download opened");
    Ok(Download::new(response, total_size))
}

impl<R: Read> Download<R> {
    pub fn new(reader: R, total_size: Option<u64>) -> Self {
        Self { reader, total_size }
    }

    /// Copy the body into `writer`, reporting each chunk. Returns the number of
    /// bytes written. On error the writer keeps whatever was written so far.
    pub fn save_to<W: Write>(mut self, writer: &mut W, sink: &dyn ProgressSink) -> Result<u64, DownloadError> {
        sink.on_progress(ProgressEvent::DownloadStarted { total: self.total_size });
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write_all(&buf[..n])?;
            written += n as u64;
            sink.on_progress(ProgressEvent::DownloadAdvanced { bytes: n as u64 });
        }
        writer.flush()?;
        sink.on_progress(ProgressEvent::DownloadFinished { bytes: written });
        Ok(written)
    }
}
