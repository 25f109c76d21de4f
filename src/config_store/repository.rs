//! ConfigStore Repository
//!
//! File access layer: the whole fleet lives in one JSON file, written
//! through a temp file and renamed into place.

use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::*;
use crate::error::{Error, Result};
use crate::fleet::Host;

/// Extension appended to the fleet file for its backup copy
pub const BACKUP_EXTENSION: &str = "bak";

/// ConfigStore repository for file operations
#[derive(Debug, Clone)]
pub struct FleetRepository {
    path: PathBuf,
}

impl FleetRepository {
    /// Create new repository
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<file>.bak`
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, BACKUP_EXTENSION)
    }

    /// Load all hosts; a missing file is an empty fleet
    pub async fn load(&self) -> Result<Vec<Host>> {
        match fs::read(&self.path).await {
            Ok(bytes) => read_fleet(&bytes, &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Fleet file not found, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist all hosts, copying the previous file to the backup first when `backup`
    pub async fn save(&self, hosts: &[Host], backup: bool) -> Result<()> {
        if backup && fs::try_exists(&self.path).await? {
            fs::copy(&self.path, self.backup_path()).await?;
            tracing::debug!(backup = %self.backup_path().display(), "Fleet file backed up");
        }

        let body = serde_json::to_vec_pretty(&FleetFile::new(hosts.to_vec()))?;
        self.write_atomic(&body).await?;

        tracing::debug!(path = %self.path.display(), hosts = hosts.len(), "Fleet file saved");
        Ok(())
    }

    pub async fn has_backup(&self) -> bool {
        fs::try_exists(self.backup_path()).await.unwrap_or(false)
    }

    /// Replace the fleet file with its backup and return the restored hosts
    pub async fn restore_backup(&self) -> Result<Vec<Host>> {
        let backup = self.backup_path();
        let bytes = match fs::read(&backup).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "No backup at {}",
                    backup.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        // validate before overwriting the live file
        let hosts = read_fleet(&bytes, &backup)?;
        self.write_atomic(&bytes).await?;

        tracing::info!(path = %self.path.display(), hosts = hosts.len(), "Fleet restored from backup");
        Ok(hosts)
    }

    async fn write_atomic(&self, body: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn read_fleet(bytes: &[u8], path: &Path) -> Result<Vec<Host>> {
    let file: FleetFile = serde_json::from_slice(bytes)
        .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
    if file.format > FLEET_FILE_FORMAT {
        return Err(Error::Config(format!(
            "{}: fleet file format {} is newer than supported {}",
            path.display(),
            file.format,
            FLEET_FILE_FORMAT
        )));
    }
    Ok(file.hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::Camera;

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            cameras: vec![Camera {
                id: "cam0".to_string(),
                ..Camera::default()
            }],
            ..Host::default()
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FleetRepository::new(dir.path().join("fleet.json"));
        assert!(repo.load().await.unwrap().is_empty());
        assert!(!repo.has_backup().await);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FleetRepository::new(dir.path().join("nested").join("fleet.json"));
        repo.save(&[host("a"), host("b")], true).await.unwrap();

        let hosts = repo.load().await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].cameras[0].id, "cam0");
        // nothing to back up on first save
        assert!(!repo.has_backup().await);
        assert!(!dir.path().join("nested").join("fleet.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FleetRepository::new(dir.path().join("fleet.json"));
        assert!(matches!(repo.restore_backup().await, Err(Error::NotFound(_))));

        repo.save(&[host("a")], true).await.unwrap();
        repo.save(&[host("a"), host("b")], true).await.unwrap();
        assert_eq!(repo.backup_path(), dir.path().join("fleet.json.bak"));
        assert!(repo.has_backup().await);

        let restored = repo.restore_backup().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(repo.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        std::fs::write(&path, b"{not json").unwrap();
        let repo = FleetRepository::new(path.clone());
        assert!(matches!(repo.load().await, Err(Error::Parse(_))));
    }
}
