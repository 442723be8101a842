use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use uuid::Uuid;

const ARTIFACT_PREFIX: &str = "imagen_";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to create artifact directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Scratch directory holding one file per in-flight upload.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self, bytes: &[u8]) -> Result<Artifact, ArtifactError> {
        let path = self.dir.join(self.next_name());

        // create_new: never clobber another request's file, even on a name clash.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;

        // From here on the guard owns the path and removes it on any exit.
        let artifact = Artifact {
            path,
            released: false,
        };

        let written = file.write_all(bytes).and_then(|()| file.flush());
        drop(file);
        written.map_err(|source| ArtifactError::Write {
            path: artifact.path.clone(),
            source,
        })?;

        log::debug!("Stored {} bytes at {}", bytes.len(), artifact.path.display());
        Ok(artifact)
    }

    /// Removes artifacts left behind by a previous process. Only safe before
    /// the server starts accepting requests.
    pub fn sweep_orphans(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot scan {} for orphaned artifacts: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_artifact = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX));
            if !is_artifact {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!(
                    "Failed to remove orphaned artifact {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        removed
    }

    fn next_name(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let nonce = Uuid::new_v4().simple().to_string();
        format!(
            "{}{}_{:06}_{}.jpg",
            ARTIFACT_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S_%6f"),
            sequence,
            &nonce[..8]
        )
    }
}

/// One stored upload. Released explicitly on the normal path; dropping an
/// unreleased artifact removes it as well, so error returns and panics
/// unwinding through the pipeline still clean up.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    released: bool,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<u8>, ArtifactError> {
        fs::read(&self.path).map_err(|source| ArtifactError::Read {
            path: self.path.clone(),
            source,
        })
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed artifact {}", self.path.display()),
            Err(e) => log::warn!("Failed to remove artifact {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn store_writes_bytes_and_release_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let artifact = store.store(b"image bytes").unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(artifact.read().unwrap(), b"image bytes");

        artifact.release();
        assert!(!path.exists());
    }

    #[test]
    fn dropping_an_artifact_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let path = {
            let artifact = store.store(b"x").unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn releasing_a_vanished_artifact_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let artifact = store.store(b"x").unwrap();
        fs::remove_file(artifact.path()).unwrap();
        artifact.release();
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = ArtifactStore::new(&nested).unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn concurrent_stores_get_distinct_names_and_keep_their_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..32u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let payload = vec![i; 64];
                    let artifact = store.store(&payload).unwrap();
                    assert_eq!(artifact.read().unwrap(), payload);
                    let name = artifact.path().to_path_buf();
                    // Keep the file alive until every thread has stored.
                    (name, artifact)
                })
            })
            .collect();

        let results: Vec<(PathBuf, Artifact)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let names: HashSet<&PathBuf> = results.iter().map(|(p, _)| p).collect();
        assert_eq!(names.len(), 32);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 32);

        drop(results);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sweep_removes_only_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("imagen_20240101_000000_000000_000000_deadbeef.jpg"), b"a").unwrap();
        fs::write(dir.path().join("imagen_old.jpg"), b"b").unwrap();
        fs::write(dir.path().join("keep.txt"), b"c").unwrap();

        let store = ArtifactStore::new(dir.path()).unwrap();
        assert_eq!(store.sweep_orphans(), 2);

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("keep.txt")]);
    }
}
