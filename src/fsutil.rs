use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{0} already exists")]
    DestinationExists(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CopyError + '_ {
    move |source| CopyError::Io { path: path.to_path_buf(), source }
}

/// Copy the tree under `src` into `dst`, returning the number of files copied.
///
/// Every directory is recreated, empty ones included. An existing destination
/// file is never overwritten: the copy stops with
/// [`CopyError::DestinationExists`].
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64, CopyError> {
    let mut files = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|source| CopyError::Walk { path: src.to_path_buf(), source })?;
        let rel = entry.path().strip_prefix(src).map_err(|_| CopyError::Io {
            path: entry.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path outside copy root"),
        })?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(io_err(&target))?;
            continue;
        }

        if target.symlink_metadata().is_ok() {
            return Err(CopyError::DestinationExists(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        debug!("copy {} -> {}", entry.path().display(), target.display());
        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_err(&target))?;
        }
        files += 1;
    }
    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), CopyError> {
    let link = fs::read_link(src).map_err(io_err(src))?;
    std::os::unix::fs::symlink(link, dst).map_err(io_err(dst))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), CopyError> {
    fs::copy(src, dst).map(|_| ()).map_err(io_err(dst))
}

/// Remove `path` if present and recreate it empty.
pub fn reset_dir(path: &Path) -> Result<(), CopyError> {
    if path.symlink_metadata().is_ok() {
        fs::remove_dir_all(path).map_err(io_err(path))?;
    }
    fs::create_dir_all(path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use tracing_subscriber::EnvFilter;

    fn prepare_tree(root: &Path) {
        fs::create_dir_all(root.join("A")).unwrap();
        fs::create_dir_all(root.join("B")).unwrap();
        fs::create_dir_all(root.join("C/D/E")).unwrap();
        fs::write(root.join("TestFile1"), "HelloWorld1").unwrap();
        fs::write(root.join("A/TestFile2"), "HelloWorld2").unwrap();
        fs::write(root.join("C/D/bin.dat"), [0u8, 159, 146, 150, 255]).unwrap();
    }

    #[test]
    fn copies_tree_with_empty_dirs() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("test");
        let dst = dir.path().join("test2");
        prepare_tree(&src);

        let copied = copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(copied, 3);
        assert_eq!(fs::read_to_string(dst.join("TestFile1")).unwrap(), "HelloWorld1");
        assert_eq!(fs::read_to_string(dst.join("A/TestFile2")).unwrap(), "HelloWorld2");
        assert_eq!(fs::read(dst.join("C/D/bin.dat")).unwrap(), [0u8, 159, 146, 150, 255]);
        assert!(dst.join("B").is_dir());
        assert!(dst.join("C/D/E").is_dir());
    }

    #[test]
    fn copies_into_existing_empty_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        prepare_tree(&src);
        fs::create_dir_all(&dst).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();
        assert!(dst.join("A/TestFile2").is_file());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        prepare_tree(&src);
        fs::create_dir_all(dst.join("A")).unwrap();
        fs::write(dst.join("A/TestFile2"), "stale").unwrap();

        let err = copy_dir_recursive(&src, &dst).unwrap_err();
        assert!(matches!(err, CopyError::DestinationExists(p) if p == dst.join("A/TestFile2")));
        assert_eq!(fs::read_to_string(dst.join("A/TestFile2")).unwrap(), "stale");
    }

    #[test]
    fn missing_source_is_a_walk_error() {
        let dir = tempdir().unwrap();
        let err = copy_dir_recursive(&dir.path().join("absent"), &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, CopyError::Walk { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_recreated() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        prepare_tree(&src);
        std::os::unix::fs::symlink("TestFile1", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), PathBuf::from("TestFile1"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copied_paths_show_in_verbose_log() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        prepare_tree(&src);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(crate::VERBOSE_FILTER))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || copy_dir_recursive(&src, &dst).unwrap());

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains(&dst.join("A/TestFile2").display().to_string()), "{log}");
    }

    #[test]
    fn reset_dir_empties_existing_tree() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        prepare_tree(&root);

        reset_dir(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        let fresh = dir.path().join("fresh");
        reset_dir(&fresh).unwrap();
        assert!(fresh.is_dir());
    }
}
