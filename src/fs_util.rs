use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, TempDir};

use crate::error::EcosystemError;

/// Writes `content` next to `path` and renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EcosystemError> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent.as_std_path()).map_err(EcosystemError::fs)?;
    let mut temp = Builder::new()
        .prefix(".ecosystem-write")
        .tempfile_in(parent.as_std_path())
        .map_err(EcosystemError::fs)?;
    temp.write_all(content).map_err(EcosystemError::fs)?;
    temp.flush().map_err(EcosystemError::fs)?;
    temp.persist(path.as_std_path())
        .map_err(|err| EcosystemError::fs(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

/// A scratch directory created beside `target`, so that a rename can swap it in.
pub fn staging_dir(target: &Utf8Path) -> Result<(TempDir, Utf8PathBuf), EcosystemError> {
    let parent = parent_dir(target);
    fs::create_dir_all(parent.as_std_path()).map_err(EcosystemError::fs)?;
    let temp = Builder::new()
        .prefix(".ecosystem-stage")
        .tempdir_in(parent.as_std_path())
        .map_err(EcosystemError::fs)?;
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .map_err(|_| EcosystemError::fs("staging directory is not valid UTF-8"))?;
    Ok((temp, path))
}

/// Replaces `target` with `staged`.
///
/// The previous directory is moved aside first and only removed once the new
/// one is in place; on failure it is restored.
pub fn replace_dir_atomic(staged: &Utf8Path, target: &Utf8Path) -> Result<(), EcosystemError> {
    if !target.as_std_path().exists() {
        return fs::rename(staged.as_std_path(), target.as_std_path())
            .map_err(|err| EcosystemError::fs(format!("rename into {target}: {err}")));
    }

    let backup = target.with_file_name(format!(
        ".{}.previous",
        target.file_name().unwrap_or("store")
    ));
    remove_dir_if_exists(backup.as_std_path())?;
    fs::rename(target.as_std_path(), backup.as_std_path())
        .map_err(|err| EcosystemError::fs(format!("move aside {target}: {err}")))?;
    if let Err(err) = fs::rename(staged.as_std_path(), target.as_std_path()) {
        let _ = fs::rename(backup.as_std_path(), target.as_std_path());
        return Err(EcosystemError::fs(format!("rename into {target}: {err}")));
    }
    remove_dir_if_exists(backup.as_std_path())
}

fn remove_dir_if_exists(path: &Path) -> Result<(), EcosystemError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(EcosystemError::fs)?;
    }
    Ok(())
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(path: &Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn atomic_write_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let path = utf8(temp.path()).join("nested/file.json");
        write_bytes_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"{}");
    }

    #[test]
    fn replace_swaps_directory_contents() {
        let temp = tempfile::tempdir().unwrap();
        let target = utf8(temp.path()).join("members");
        fs::create_dir_all(target.join("old").as_std_path()).unwrap();

        let (guard, staged) = staging_dir(&target).unwrap();
        fs::write(staged.join("new.toml").as_std_path(), "").unwrap();
        replace_dir_atomic(&staged, &target).unwrap();
        drop(guard);

        assert!(target.join("new.toml").as_std_path().exists());
        assert!(!target.join("old").as_std_path().exists());
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
