// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

use crate::coding::{DecodeError, EncodeError};

/// Errors produced by the storage engine core.
#[derive(Debug)]
pub enum Error {
    /// Header format stamp mismatch, out-of-range top ref, invalid array
    /// header, or a free-list invariant violation.
    CorruptedFile(&'static str),

    /// HMAC mismatch while decrypting a page.
    DecryptionFailed,

    /// Underlying read/write/ftruncate/mmap/msync failure.
    Io(std::io::Error),

    /// The slab allocator or the system allocator returned failure.
    OutOfMemory,

    /// File extension failed because the device had no space left.
    DiskFull,

    /// Open-time failure: the caller lacks permission on the path.
    PermissionDenied,

    /// Open-time failure: the path does not exist (and was not requested to
    /// be created).
    FileNotFound,

    /// Another process holds the writer lock and non-blocking mode was
    /// requested.
    WriteLocked,

    /// A cluster tree lookup found no object for the given key.
    KeyNotFound,

    /// A cluster tree insert was attempted with a key already present.
    KeyAlreadyUsed,

    /// `Group::get_table` / table removal referenced an unknown table.
    NoSuchTable,

    /// A column index was out of range, or of the wrong type, for the
    /// requested operation.
    InvalidColumn,

    /// An accessor's captured version no longer matches the tree's current
    /// version; the caller may re-descend from the root.
    StaleAccessor,

    /// A mutation was attempted through a read snapshot.
    ReadOnly,

    /// Encoding a persistent structure failed.
    Encode(EncodeError),

    /// Decoding a persistent structure failed.
    Decode(DecodeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(value),
        }
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Result type used throughout the storage engine.
pub type Result<T> = std::result::Result<T, Error>;
