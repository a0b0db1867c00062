// compile-service-rs/src/job.rs
// Per-request job state and working-directory lifecycle.

use std::io;
use std::path::Path;

use tempfile::TempDir;
use uuid::Uuid;

/// One end-to-end request lifecycle, from source submission to the final
/// success/failure response.
///
/// The working directory is owned by the job and removed when the job is
/// dropped, so cleanup happens on every exit path. Removal failures are
/// swallowed by the `TempDir` drop and never escalated.
pub struct Job {
    pub id: String,
    /// Current source text; replaced by the fix loop between attempts.
    pub source: String,
    workdir: TempDir,
}

impl Job {
    pub fn create(source: String) -> io::Result<Self> {
        let id = Uuid::new_v4().to_string();
        let workdir = tempfile::Builder::new().prefix("texjob-").tempdir()?;
        log::debug!("job {}: workspace {}", id, workdir.path().display());

        Ok(Self { id, source, workdir })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_get_unique_ids_and_directories() {
        let a = Job::create("a".to_string()).unwrap();
        let b = Job::create("b".to_string()).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.workdir(), b.workdir());
        assert!(a.workdir().is_dir());
        assert!(b.workdir().is_dir());
    }

    #[test]
    fn test_workdir_removed_on_drop() {
        let job = Job::create("x".to_string()).unwrap();
        let path = job.workdir().to_path_buf();
        assert!(path.exists());
        drop(job);
        assert!(!path.exists());
    }
}
