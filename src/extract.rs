use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;

use crate::progress::{ProgressEvent, ProgressSink};

/// Length of the `go/` directory every distribution archive is rooted at.
const ROOT_PREFIX_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive entry {0:?} escapes the destination")]
    UnsafePath(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io { path: path.to_path_buf(), source }
}

/// Unpacks a toolchain distribution archive into an installation root.
pub trait Extractor {
    /// File extension of the archives this extractor reads.
    fn extension(&self) -> &'static str;

    fn extract(&self, archive: &Path, destination: &Path, sink: &dyn ProgressSink) -> Result<(), ExtractError>;
}

/// Windows distributions ship as zip, everything else as tar.gz.
pub fn extractor_for(platform: &str) -> Box<dyn Extractor> {
    if platform == "windows" {
        Box::new(ZipExtractor)
    } else {
        Box::new(TarGzExtractor)
    }
}

/// Map an archive entry name to its path under `destination`, dropping the
/// top-level `go/` prefix. `None` for the prefix directory itself.
fn destination_path(destination: &Path, name: &str) -> Result<Option<PathBuf>, ExtractError> {
    let rel = name.get(ROOT_PREFIX_LEN..).unwrap_or("");
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        return Ok(None);
    }
    let rel = Path::new(rel);
    if !rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(ExtractError::UnsafePath(name.to_string()));
    }
    Ok(Some(destination.join(rel)))
}

/// Whether a symlink in `link_dir` (relative to the destination) pointing at
/// `target` resolves to somewhere under the destination.
fn link_stays_inside(link_dir: &Path, target: &Path) -> bool {
    let mut depth = link_dir.components().count();
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn ensure_parent(path: &Path) -> Result<(), ExtractError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(io_err(parent)),
        None => Ok(()),
    }
}

pub struct TarGzExtractor;

impl Extractor for TarGzExtractor {
    fn extension(&self) -> &'static str {
        "tar.gz"
    }

    fn extract(&self, archive: &Path, destination: &Path, sink: &dyn ProgressSink) -> Result<(), ExtractError> {
        let file = File::open(archive).map_err(io_err(archive))?;
        let mut tar = Archive::new(GzDecoder::new(file));
        tar.set_preserve_permissions(true);

        for entry in tar.entries().map_err(io_err(archive))? {
            let mut entry = entry.map_err(io_err(archive))?;
            let name = entry.path().map_err(io_err(archive))?.to_string_lossy().into_owned();
            let Some(target) = destination_path(destination, &name)? else {
                continue;
            };

            let kind = entry.header().entry_type();
            if kind.is_dir() {
                fs::create_dir_all(&target).map_err(io_err(&target))?;
                continue;
            }
            ensure_parent(&target)?;

            if kind.is_hard_link() || kind.is_symlink() {
                let link = entry
                    .link_name()
                    .map_err(io_err(archive))?
                    .ok_or_else(|| ExtractError::UnsafePath(name.clone()))?
                    .into_owned();
                if kind.is_hard_link() {
                    // Hard link names are archive paths, not relative to the entry.
                    let source = destination_path(destination, &link.to_string_lossy())?
                        .ok_or_else(|| ExtractError::UnsafePath(name.clone()))?;
                    fs::hard_link(&source, &target).map_err(io_err(&target))?;
                    sink.on_progress(ProgressEvent::Extracted { path: target });
                    continue;
                }
                let link_dir = target
                    .parent()
                    .and_then(|p| p.strip_prefix(destination).ok())
                    .unwrap_or(Path::new(""));
                if !link_stays_inside(link_dir, &link) {
                    return Err(ExtractError::UnsafePath(name));
                }
            }
            entry.unpack(&target).map_err(io_err(&target))?;
            sink.on_progress(ProgressEvent::Extracted { path: target });
        }
        Ok(())
    }
}

pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn extension(&self) -> &'static str {
        "zip"
    }

    fn extract(&self, archive: &Path, destination: &Path, sink: &dyn ProgressSink) -> Result<(), ExtractError> {
        let file = File::open(archive).map_err(io_err(archive))?;
        let mut reader = zip::ZipArchive::new(file)?;

        for i in 0..reader.len() {
            let mut entry = reader.by_index(i)?;
            let name = entry.name().replace('\\', "/");
            let Some(target) = destination_path(destination, &name)? else {
                continue;
            };

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(io_err(&target))?;
                continue;
            }
            ensure_parent(&target)?;
            let mut out = File::create(&target).map_err(io_err(&target))?;
            io::copy(&mut entry, &mut out).map_err(io_err(&target))?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                    .map_err(io_err(&target))?;
            }
            sink.on_progress(ProgressEvent::Extracted { path: target });
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{make_tar_gz, make_zip};
    use super::*;
    use crate::progress::testing::RecordingSink;
    use tempfile::tempdir;

    const ENTRIES: &[(&str, &[u8])] = &[
        ("go/", b""),
        ("go/VERSION", b"go1.10.3"),
        ("go/bin/", b""),
        ("go/bin/go", b"#!/bin/sh\necho fake"),
        ("go/src/", b""),
        ("go/src/cmd/main.go", b"package main"),
    ];

    fn check_tree(root: &Path) {
        assert_eq!(fs::read(root.join("VERSION")).unwrap(), b"go1.10.3");
        assert_eq!(fs::read(root.join("bin/go")).unwrap(), b"#!/bin/sh\necho fake");
        assert_eq!(fs::read(root.join("src/cmd/main.go")).unwrap(), b"package main");
        assert!(!root.join("go").exists());
    }

    #[test]
    fn picks_extractor_by_platform() {
        assert_eq!(extractor_for("windows").extension(), "zip");
        assert_eq!(extractor_for("linux").extension(), "tar.gz");
        assert_eq!(extractor_for("darwin").extension(), "tar.gz");
    }

    #[test]
    fn strips_root_prefix() {
        let dest = Path::new("/opt/go");
        assert_eq!(destination_path(dest, "go/bin/go").unwrap(), Some(dest.join("bin/go")));
        assert_eq!(destination_path(dest, "go/").unwrap(), None);
        assert_eq!(destination_path(dest, "go").unwrap(), None);
        assert!(matches!(
            destination_path(dest, "go/../../etc/passwd"),
            Err(ExtractError::UnsafePath(_))
        ));
    }

    #[test]
    fn extracts_tar_gz() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("go.tar.gz");
        fs::write(&archive, make_tar_gz(ENTRIES)).unwrap();
        let dest = dir.path().join("goroot");
        fs::create_dir_all(&dest).unwrap();
        let sink = RecordingSink::default();

        TarGzExtractor.extract(&archive, &dest, &sink).unwrap();

        check_tree(&dest);
        assert_eq!(sink.events().len(), 3);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("bin/go")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn extracts_zip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("go.zip");
        fs::write(&archive, make_zip(ENTRIES)).unwrap();
        let dest = dir.path().join("goroot");
        fs::create_dir_all(&dest).unwrap();
        let sink = RecordingSink::default();

        ZipExtractor.extract(&archive, &dest, &sink).unwrap();

        check_tree(&dest);
        assert!(dest.join("src/cmd").is_dir());
        assert_eq!(sink.events().len(), 3);
    }

    fn tar_gz_with_link(kind: tar::EntryType, name: &str, link: &str) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(8);
        header.set_mode(0o755);
        archive.append_data(&mut header, "go/bin/go", &b"go1.10.3"[..]).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_link_name(link).unwrap();
        archive.append_data(&mut header, name, std::io::empty()).unwrap();
        archive.into_inner().unwrap().finish().unwrap()
    }

    fn extract_link(kind: tar::EntryType, name: &str, link: &str) -> (tempfile::TempDir, Result<(), ExtractError>) {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("go.tar.gz");
        fs::write(&archive, tar_gz_with_link(kind, name, link)).unwrap();
        let dest = dir.path().join("goroot");
        fs::create_dir_all(&dest).unwrap();
        let result = TarGzExtractor.extract(&archive, &dest, &RecordingSink::default());
        (dir, result)
    }

    #[test]
    fn link_targets_are_checked_against_destination() {
        assert!(link_stays_inside(Path::new("bin"), Path::new("go")));
        assert!(link_stays_inside(Path::new("bin"), Path::new("../pkg/tool")));
        assert!(link_stays_inside(Path::new(""), Path::new("./bin/go")));
        assert!(!link_stays_inside(Path::new("bin"), Path::new("../../etc/passwd")));
        assert!(!link_stays_inside(Path::new(""), Path::new("..")));
        assert!(!link_stays_inside(Path::new("bin"), Path::new("/etc/passwd")));
    }

    #[test]
    fn escaping_symlink_is_rejected() {
        let (dir, result) = extract_link(tar::EntryType::Symlink, "go/bin/evil", "../../../outside");
        assert!(matches!(result, Err(ExtractError::UnsafePath(name)) if name == "go/bin/evil"));
        assert!(fs::symlink_metadata(dir.path().join("goroot/bin/evil")).is_err());

        let (_dir, result) = extract_link(tar::EntryType::Symlink, "go/bin/evil", "/etc/passwd");
        assert!(matches!(result, Err(ExtractError::UnsafePath(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_destination_is_kept() {
        let (dir, result) = extract_link(tar::EntryType::Symlink, "go/bin/gofmt", "go");
        result.unwrap();
        let link = dir.path().join("goroot/bin/gofmt");
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("go"));
        assert_eq!(fs::read(&link).unwrap(), b"go1.10.3");
    }

    #[test]
    fn hard_link_resolves_within_destination() {
        let (dir, result) = extract_link(tar::EntryType::Link, "go/bin/gofmt", "go/bin/go");
        result.unwrap();
        assert_eq!(fs::read(dir.path().join("goroot/bin/gofmt")).unwrap(), b"go1.10.3");
    }

    #[test]
    fn escaping_hard_link_is_rejected() {
        let (_dir, result) = extract_link(tar::EntryType::Link, "go/bin/gofmt", "go/../../secret");
        assert!(matches!(result, Err(ExtractError::UnsafePath(_))));
    }

    #[test]
    fn corrupt_tar_gz_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("go.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();
        let result = TarGzExtractor.extract(&archive, dir.path(), &RecordingSink::default());
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }

    #[test]
    fn corrupt_zip_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("go.zip");
        fs::write(&archive, b"definitely not zip").unwrap();
        let result = ZipExtractor.extract(&archive, dir.path(), &RecordingSink::default());
        assert!(matches!(result, Err(ExtractError::Zip(_))));
    }

    #[test]
    fn missing_archive_fails() {
        let dir = tempdir().unwrap();
        let result = TarGzExtractor.extract(&dir.path().join("absent.tar.gz"), dir.path(), &RecordingSink::default());
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }
}
