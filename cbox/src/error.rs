//! The status taxonomy of spec §4.7. These are not Rust-level exceptions:
//! every fallible operation in the runtime returns one of these values, and
//! the command dispatcher echoes it back to the client as a two-byte code.

use strum::FromRepr;

/// Status code returned by a command, or carried internally between
/// subsystems. Never used as a `std::error::Error` for control flow —
/// callers match on it directly, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 0,
    UnknownCommand = 1,
    InsufficientHeap = 2,
    InsufficientPersistentStorage = 3,
    InvalidObjectId = 4,
    ObjectNotWritable = 5,
    ObjectNotReadable = 6,
    ObjectNotCreatable = 7,
    ObjectNotDeletable = 8,
    InvalidObjectType = 9,
    PersistedObjectNotFound = 10,
    CrcErrorInStoredObject = 11,
    PersistedBlockStreamError = 12,
    InputStreamReadError = 13,
    OutputStreamWriteError = 14,
    InvalidPersistedBlockType = 15,
    CouldNotReadPersistedBlockSize = 16,
    PersistedStorageWriteError = 17,
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl From<cbox_stream::StreamError> for StatusCode {
    fn from(e: cbox_stream::StreamError) -> Self {
        match e {
            cbox_stream::StreamError::ReadError => StatusCode::InputStreamReadError,
            cbox_stream::StreamError::WriteError => StatusCode::OutputStreamWriteError,
        }
    }
}

pub type CboxResult<T> = Result<T, StatusCode>;
