//! The file-backed driver: a plain regular file used as a block device's
//! backing store, with no redundancy of its own and no kernel major/minor
//! identity (the file path is the kernel identity).

use std::sync::Arc;

use stackdev_utils::Runner;

use crate::device::BlockDev;
use crate::error::{Error, Result};

/// A file-backed device's identity: a driver tag (reserved for future
/// backend flavours; this crate only implements the plain-file flavour)
/// and an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    pub driver: String,
    pub path: String,
}

#[derive(Debug)]
pub struct FileStorage {
    id: FileId,
    #[allow(dead_code)]
    runner: Arc<dyn Runner>,
    children: Vec<Box<dyn BlockDev>>,
}

impl FileStorage {
    pub fn new(id: FileId, runner: Arc<dyn Runner>) -> Self {
        Self {
            id,
            runner,
            children: Vec::new(),
        }
    }

    /// Create the backing file, truncated to exactly `size_mib` MiB.
    pub fn create(id: FileId, children: Vec<Box<dyn BlockDev>>, size_mib: u64, runner: Arc<dyn Runner>) -> Result<Self> {
        if !children.is_empty() {
            return Err(Error::programmer("Invalid setup for file device"));
        }
        let file = std::fs::File::create(&id.path)
            .map_err(|e| Error::block_device(format!("Could not create file storage '{}': {e}", id.path)))?;
        file.set_len(size_mib * 1024 * 1024)
            .map_err(|e| Error::block_device(format!("Could not set size for file storage '{}': {e}", id.path)))?;
        Ok(Self::new(id, runner))
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }
}

impl BlockDev for FileStorage {
    fn dev_path(&self) -> Option<&str> {
        Some(&self.id.path)
    }

    fn major(&self) -> Option<u32> {
        None
    }

    fn minor(&self) -> Option<u32> {
        None
    }

    fn children(&self) -> &[Box<dyn BlockDev>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<Box<dyn BlockDev>> {
        &mut self.children
    }

    fn attach(&mut self) -> Result<bool> {
        Ok(std::path::Path::new(&self.id.path).exists())
    }

    fn assemble(&mut self) -> Result<bool> {
        if !std::path::Path::new(&self.id.path).exists() {
            return Err(Error::block_device(format!(
                "File device '{}' does not exist.",
                self.id.path
            )));
        }
        Ok(true)
    }

    fn remove(&mut self) -> Result<bool> {
        if !std::path::Path::new(&self.id.path).exists() {
            return Ok(true);
        }
        match std::fs::remove_file(&self.id.path) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("Can't remove file '{}': {e}", self.id.path);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackdev_utils::FakeRunner;

    #[test]
    fn create_truncates_to_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk0").to_str().unwrap().to_string();
        let id = FileId { driver: "file".into(), path: path.clone() };
        let dev = FileStorage::create(id, vec![], 4, FakeRunner::new()).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 4 * 1024 * 1024);
        assert_eq!(dev.dev_path(), Some(path.as_str()));
    }

    #[test]
    fn create_rejects_children() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk0").to_str().unwrap().to_string();
        let backing: Box<dyn BlockDev> = Box::new(FileStorage::new(
            FileId { driver: "file".into(), path: "/tmp/other".into() },
            FakeRunner::new(),
        ));
        let err = FileStorage::create(
            FileId { driver: "file".into(), path },
            vec![backing],
            4,
            FakeRunner::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Programmer(_)));
    }

    #[test]
    fn assemble_fails_when_file_missing() {
        let mut dev = FileStorage::new(
            FileId { driver: "file".into(), path: "/nonexistent/path/disk0".into() },
            FakeRunner::new(),
        );
        assert!(dev.assemble().is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk0").to_str().unwrap().to_string();
        let mut dev = FileStorage::new(FileId { driver: "file".into(), path }, FakeRunner::new());
        assert!(dev.remove().unwrap());
    }

    #[test]
    fn attach_reports_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk0");
        std::fs::write(&path, b"").unwrap();
        let mut dev = FileStorage::new(
            FileId { driver: "file".into(), path: path.to_str().unwrap().to_string() },
            FakeRunner::new(),
        );
        assert!(dev.attach().unwrap());
    }
}
