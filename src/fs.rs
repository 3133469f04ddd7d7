// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use std::{fs, io, path::Path};

/// Filesystem abstraction, so the engine can be driven against a mock backend in tests.
pub trait FileSystem: Send + Sync + std::panic::RefUnwindSafe + std::panic::UnwindSafe {
    /// Opens an existing file for read-write.
    fn open_read_write(path: &Path) -> io::Result<fs::File>;
    /// Opens an existing file for read-only.
    fn open_read_only(path: &Path) -> io::Result<fs::File>;
    /// Creates a new file, failing if it already exists.
    fn create_new(path: &Path) -> io::Result<fs::File>;
    /// Checks whether a path exists.
    fn exists(path: &Path) -> io::Result<bool>;
    /// Removes a file.
    fn remove_file(path: &Path) -> io::Result<()>;
}

/// `std::fs`-backed filesystem implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn open_read_write(path: &Path) -> io::Result<fs::File> {
        fs::OpenOptions::new().read(true).write(true).open(path)
    }

    fn open_read_only(path: &Path) -> io::Result<fs::File> {
        fs::OpenOptions::new().read(true).open(path)
    }

    fn create_new(path: &Path) -> io::Result<fs::File> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
    }

    fn exists(path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn remove_file(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
