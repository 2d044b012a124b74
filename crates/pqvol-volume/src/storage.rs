//! Byte-range storage under a container path.
//!
//! `FsBackend` holds an exclusive advisory lock (`flock`/`LockFileEx`) on the
//! container for the lifetime of a writable [`Storage`], which is what makes
//! a second concurrent mount fail with `AlreadyMounted`.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::ResourceError;

pub trait Storage: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn len(&self) -> io::Result<u64>;
}

pub trait StorageBackend: Send + Sync {
    /// Create a container file of `len` bytes, locked exclusively.
    fn create(
        &self,
        path: &Path,
        len: u64,
        overwrite: bool,
    ) -> Result<Box<dyn Storage>, ResourceError>;

    /// Open an existing container for read/write, locked exclusively.
    fn open(&self, path: &Path) -> Result<Box<dyn Storage>, ResourceError>;

    /// Open an existing container read-only without taking the lock.
    fn open_shared(&self, path: &Path) -> Result<Box<dyn Storage>, ResourceError>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsBackend;

impl FsBackend {
    fn lock(file: &File) -> Result<(), ResourceError> {
        match file.try_lock() {
            Ok(()) => Ok(()),
            Err(TryLockError::WouldBlock) => Err(ResourceError::AlreadyMounted),
            Err(TryLockError::Error(e)) => Err(ResourceError::Io(e)),
        }
    }
}

impl StorageBackend for FsBackend {
    fn create(
        &self,
        path: &Path,
        len: u64,
        overwrite: bool,
    ) -> Result<Box<dyn Storage>, ResourceError> {
        let file = if overwrite {
            // Lock before truncating so a mounted container is never clobbered
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            Self::lock(&file)?;
            file.set_len(0)?;
            file
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => ResourceError::PathExists(path.to_path_buf()),
                    _ => e.into(),
                })?;
            Self::lock(&file)?;
            file
        };
        file.set_len(len)?;
        tracing::debug!(path = %path.display(), len, "created container file");
        Ok(Box::new(FileStorage::new(file)))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Storage>, ResourceError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::lock(&file)?;
        Ok(Box::new(FileStorage::new(file)))
    }

    fn open_shared(&self, path: &Path) -> Result<Box<dyn Storage>, ResourceError> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Box::new(FileStorage::new(file)))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// A container file. The lock, if any, is released when the file closes.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    fn new(file: File) -> Self {
        Self { file }
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        let mut storage = FsBackend.create(&path, 8192, false).unwrap();
        assert_eq!(storage.len().unwrap(), 8192);

        storage.write_at(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        storage.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        storage.flush().unwrap();
    }

    #[test]
    fn test_create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        std::fs::write(&path, b"precious").unwrap();

        let err = FsBackend.create(&path, 4096, false).err().unwrap();
        assert!(matches!(err, ResourceError::PathExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"precious");
    }

    #[test]
    fn test_second_open_is_already_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        let first = FsBackend.create(&path, 4096, false).unwrap();

        let err = FsBackend.open(&path).err().unwrap();
        assert!(matches!(err, ResourceError::AlreadyMounted));

        drop(first);
        assert!(FsBackend.open(&path).is_ok());
    }

    #[test]
    fn test_overwrite_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        let _held = FsBackend.create(&path, 4096, false).unwrap();

        let err = FsBackend.create(&path, 4096, true).err().unwrap();
        assert!(matches!(err, ResourceError::AlreadyMounted));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_shared_open_ignores_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        let _held = FsBackend.create(&path, 4096, false).unwrap();
        let shared = FsBackend.open_shared(&path).unwrap();
        assert_eq!(shared.len().unwrap(), 4096);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.pqv");
        let mut storage = FsBackend.create(&path, 16, false).unwrap();
        let mut buf = [0u8; 32];
        assert!(storage.read_at(0, &mut buf).is_err());
    }
}
