use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Removes a file or directory when dropped, whatever path the owner
/// returned through.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
}

impl ScopedPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the path now and keep removing it until it stays gone for
    /// `delay`. Used after killing a process that may still be writing into it.
    pub async fn remove_settled(&self, attempts: u32, delay: Duration) {
        for attempt in 1..=attempts {
            let result = if self.path.is_dir() {
                tokio::fs::remove_dir_all(&self.path).await
            } else if self.path.exists() {
                tokio::fs::remove_file(&self.path).await
            } else {
                Ok(())
            };
            if let Err(e) = result {
                debug!("Cleanup of {} failed on attempt {}: {}", self.path.display(), attempt, e);
            }

            tokio::time::sleep(delay).await;
            if !self.path.exists() {
                debug!("Cleaned up {}", self.path.display());
                return;
            }
        }
        warn!("{} is still in use after {} cleanup attempts", self.path.display(), attempts);
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        let result = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else if self.path.exists() {
            std::fs::remove_file(&self.path)
        } else {
            return;
        };

        match result {
            Ok(()) => debug!("Cleaned up {}", self.path.display()),
            Err(e) => warn!("Failed to clean up {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_file_and_directory_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cover.jpg");
        let nested = dir.path().join("staging");
        std::fs::write(&file, b"jpeg").unwrap();
        std::fs::create_dir_all(nested.join("inner")).unwrap();
        std::fs::write(nested.join("inner").join("part"), b"x").unwrap();

        {
            let _file_guard = ScopedPath::new(&file);
            let _dir_guard = ScopedPath::new(&nested);
        }

        assert!(!file.exists());
        assert!(!nested.exists());
    }

    #[test]
    fn missing_path_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ScopedPath::new(dir.path().join("never-created"));
        assert!(!guard.path().exists());
        drop(guard);
    }

    #[tokio::test]
    async fn settled_removal_outlasts_a_late_writer() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let writer_dir = staging.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            std::fs::create_dir_all(&writer_dir).unwrap();
            std::fs::write(writer_dir.join("part"), b"late").unwrap();
        });

        ScopedPath::new(&staging)
            .remove_settled(5, Duration::from_millis(50))
            .await;
        writer.await.unwrap();

        assert!(!staging.exists());
    }
}
