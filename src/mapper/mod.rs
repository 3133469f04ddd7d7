// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

pub mod header;

pub use header::FileHeader;

use crate::error::{Error, Result};
use crate::file::{self, HEADER_SIZE};
use crate::fs::FileSystem;
use fs4::fs_std::FileExt;
use std::{fs::File, path::Path};

/// How a [`FileMapper`] was opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

enum MapKind {
    ReadOnly(memmap2::Mmap),
    ReadWrite(memmap2::MmapMut),
}

impl MapKind {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::ReadOnly(m) => m,
            Self::ReadWrite(m) => m,
        }
    }
}

/// Maps a database file into the process address space.
///
/// When no encryption key is configured this is the sole translation layer
/// between a [`crate::ref_::Ref`] and process memory; with encryption it sits
/// underneath [`crate::crypto::EncryptedPage`], which intercepts reads/writes
/// to decrypt and authenticate pages lazily.
pub struct FileMapper {
    file: File,
    map: MapKind,
    mode: OpenMode,
}

impl FileMapper {
    /// Opens `path`, creating it (with a fresh 24-byte header) if it is empty
    /// and `mode` is `ReadWrite`.
    pub fn open<FS: FileSystem>(path: &Path, mode: OpenMode) -> Result<Self> {
        let file = match mode {
            OpenMode::ReadOnly => FS::open_read_only(path)?,
            OpenMode::ReadWrite => {
                if !FS::exists(path)? {
                    return Err(Error::FileNotFound);
                }
                FS::open_read_write(path)?
            }
        };

        let len = file.metadata()?.len();

        if len == 0 {
            if mode == OpenMode::ReadOnly {
                return Err(Error::CorruptedFile("empty file opened read-only"));
            }
            file::preallocate(&file, HEADER_SIZE)?;
            let mut mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };
            mmap[..HEADER_SIZE as usize].copy_from_slice(&FileHeader::fresh().encode());
            mmap.flush()?;
            return Ok(Self { file, map: MapKind::ReadWrite(mmap), mode });
        }

        if len < HEADER_SIZE {
            return Err(Error::CorruptedFile("file shorter than header"));
        }

        let map = match mode {
            OpenMode::ReadOnly => MapKind::ReadOnly(unsafe { memmap2::Mmap::map(&file)? }),
            OpenMode::ReadWrite => MapKind::ReadWrite(unsafe { memmap2::MmapMut::map_mut(&file)? }),
        };

        let mapper = Self { file, map, mode };
        let _ = mapper.header()?; // validate stamp eagerly
        Ok(mapper)
    }

    /// Current mapping length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.map.as_bytes().len() as u64
    }

    /// Parses the 24-byte file header.
    pub fn header(&self) -> Result<FileHeader> {
        let mut bytes = [0_u8; HEADER_SIZE as usize];
        bytes.copy_from_slice(&self.map.as_bytes()[..HEADER_SIZE as usize]);
        Ok(FileHeader::decode(&bytes)?)
    }

    /// Writes the file header in place (used only by the committer, which
    /// calls it twice: once for the top-ref slot, once for the select byte).
    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        let bytes = header.encode();
        match &mut self.map {
            MapKind::ReadWrite(m) => m[..HEADER_SIZE as usize].copy_from_slice(&bytes),
            MapKind::ReadOnly(_) => return Err(Error::ReadOnly),
        }
        Ok(())
    }

    /// Grows the mapping to `new_size`, preallocating the file first so that
    /// new bytes read as zero.
    pub fn remap(&mut self, new_size: u64) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        if new_size <= self.size() {
            return Ok(());
        }

        file::preallocate(&self.file, new_size)?;
        let new_map = unsafe { memmap2::MmapMut::map_mut(&self.file)? };
        self.map = MapKind::ReadWrite(new_map);
        Ok(())
    }

    /// Returns a byte slice at `offset..offset+len`, used by the allocator to
    /// read the baseline zone.
    pub fn slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let bytes = self.map.as_bytes();
        let start = offset as usize;
        let end = start + len as usize;
        bytes.get(start..end).ok_or(Error::CorruptedFile("ref out of file bounds"))
    }

    /// Mutable access, used only by the committer while writing dirty arrays
    /// into freshly reserved file space.
    pub fn slice_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        match &mut self.map {
            MapKind::ReadWrite(m) => {
                let start = offset as usize;
                let end = start + len as usize;
                m.get_mut(start..end).ok_or(Error::CorruptedFile("ref out of file bounds"))
            }
            MapKind::ReadOnly(_) => Err(Error::ReadOnly),
        }
    }

    /// Flushes dirty bytes in `offset..offset+len` to stable storage.
    pub fn msync(&self, offset: u64, len: u64) -> Result<()> {
        match &self.map {
            MapKind::ReadWrite(m) => {
                m.flush_range(offset as usize, len as usize)?;
                Ok(())
            }
            MapKind::ReadOnly(_) => Ok(()),
        }
    }

    pub fn msync_all(&self) -> Result<()> {
        self.msync(0, self.size())
    }

    /// Acquires the advisory OS file lock used for single-writer exclusion
    ///. Blocking when `blocking` is set; otherwise returns
    /// [`Error::WriteLocked`] immediately if contended.
    pub fn lock(&self, exclusive: bool, blocking: bool) -> Result<()> {
        let result = match (exclusive, blocking) {
            (true, true) => self.file.lock_exclusive(),
            (true, false) => self.file.try_lock_exclusive(),
            (false, true) => self.file.lock_shared(),
            (false, false) => self.file.try_lock_shared(),
        };

        result.map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                Error::WriteLocked
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn unlock(&self) -> Result<()> {
        self.file.unlock().map_err(Error::from)
    }
}

/// The write side of whatever backs a database file -- a plain [`FileMapper`]
/// or, with encryption enabled, [`crate::crypto::EncryptedFile`].
///
/// Transactions don't talk to a `Storage` directly for reads: at transaction
/// open, [`Storage::snapshot`] is copied into a [`crate::alloc::FrozenBytes`]
/// and handed to the [`crate::alloc::Allocator`] as its baseline zone. This
/// keeps a reader's view pinned even as the writer later mutates storage
/// in place, without needing shared interior mutability across threads.
pub trait Storage: Send + Sync {
    fn size(&self) -> u64;
    fn snapshot(&self) -> Vec<u8>;
    fn header(&self) -> Result<FileHeader>;
    fn write_header(&mut self, header: &FileHeader) -> Result<()>;
    fn remap(&mut self, new_size: u64) -> Result<()>;
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
    fn msync(&mut self, offset: u64, len: u64) -> Result<()>;
    fn lock(&self, exclusive: bool, blocking: bool) -> Result<()>;
    fn unlock(&self) -> Result<()>;
}

impl Storage for FileMapper {
    fn size(&self) -> u64 {
        FileMapper::size(self)
    }

    fn snapshot(&self) -> Vec<u8> {
        self.map.as_bytes().to_vec()
    }

    fn header(&self) -> Result<FileHeader> {
        FileMapper::header(self)
    }

    fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        FileMapper::write_header(self, header)
    }

    fn remap(&mut self, new_size: u64) -> Result<()> {
        FileMapper::remap(self, new_size)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.slice_mut(offset, bytes.len() as u64)?.copy_from_slice(bytes);
        Ok(())
    }

    fn msync(&mut self, offset: u64, len: u64) -> Result<()> {
        FileMapper::msync(self, offset, len)
    }

    fn lock(&self, exclusive: bool, blocking: bool) -> Result<()> {
        FileMapper::lock(self, exclusive, blocking)
    }

    fn unlock(&self) -> Result<()> {
        FileMapper::unlock(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn open_creates_header_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        StdFileSystem::create_new(&path).unwrap();

        let mapper = FileMapper::open::<StdFileSystem>(&path, OpenMode::ReadWrite).unwrap();
        assert_eq!(HEADER_SIZE, mapper.size());
        assert_eq!(0, mapper.header().unwrap().current_top_ref());
    }

    #[test]
    fn remap_grows_and_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        StdFileSystem::create_new(&path).unwrap();

        let mut mapper = FileMapper::open::<StdFileSystem>(&path, OpenMode::ReadWrite).unwrap();
        mapper.remap(4096).unwrap();
        assert_eq!(4096, mapper.size());
        assert!(mapper.slice(HEADER_SIZE, 4096 - HEADER_SIZE).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        assert!(matches!(
            FileMapper::open::<StdFileSystem>(&path, OpenMode::ReadWrite),
            Err(Error::FileNotFound)
        ));
    }

    #[test]
    fn exclusive_lock_then_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        StdFileSystem::create_new(&path).unwrap();

        let mapper = FileMapper::open::<StdFileSystem>(&path, OpenMode::ReadWrite).unwrap();
        mapper.lock(true, true).unwrap();
        mapper.unlock().unwrap();
    }
}
