use std::{error::Error, fmt, io};

/// Every failure the collection engine and its store can report.
///
/// `WriteNotPermitted` and `ValueNotRegistered` double as control signals
/// inside the search paths (`index`, `count`, dict lookups), where they are
/// consumed instead of surfaced.
#[derive(Debug)]
pub enum OocError {
    /// A stored record has an unexpected size or shape.
    StorageConsistencyViolation {
        context: String,
    },
    /// Index as the caller gave it, before any negative offsetting.
    IndexOutOfRange {
        index: i64,
    },
    /// A mutation was attempted inside a read-only transaction or store.
    WriteNotPermitted,
    /// An immutable value that would need interning has never been stored.
    ValueNotRegistered,
    OutOfMemory,
    UnsupportedOperation {
        operation: &'static str,
        left: &'static str,
        right: &'static str,
    },
    UnhashableKey {
        kind: &'static str,
    },
    NotIterable {
        kind: &'static str,
    },
    ReadersFull {
        max_readers: usize,
    },
    IdSpaceExhausted,
    Mapping(String),
    Image(String),
    Io(io::Error),
}

impl OocError {
    pub(crate) fn violation(context: impl Into<String>) -> Self {
        OocError::StorageConsistencyViolation {
            context: context.into(),
        }
    }

    /// True for the two signals the search paths handle locally.
    pub fn is_search_signal(&self) -> bool {
        matches!(
            self,
            OocError::WriteNotPermitted | OocError::ValueNotRegistered
        )
    }
}

impl fmt::Display for OocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OocError::StorageConsistencyViolation { context } => {
                write!(f, "Unexpected data in storage: {}", context)
            }
            OocError::IndexOutOfRange { index } => {
                write!(f, "list index out of range: {}", index)
            }
            OocError::WriteNotPermitted => {
                write!(f, "Write attempted in a read-only transaction")
            }
            OocError::ValueNotRegistered => {
                write!(f, "Immutable value has never been stored")
            }
            OocError::OutOfMemory => write!(f, "Out of memory"),
            OocError::UnsupportedOperation {
                operation,
                left,
                right,
            } => write!(
                f,
                "'{}' not supported between instances of '{}' and '{}'",
                operation, left, right
            ),
            OocError::UnhashableKey { kind } => write!(f, "unhashable type: '{}'", kind),
            OocError::NotIterable { kind } => write!(f, "'{}' object is not iterable", kind),
            OocError::ReadersFull { max_readers } => write!(
                f,
                "All {} reader slots are in use; finish or drop open iterators",
                max_readers
            ),
            OocError::IdSpaceExhausted => write!(f, "Identifier space exhausted"),
            OocError::Mapping(msg) => write!(f, "Memory mapping error: {}", msg),
            OocError::Image(msg) => write!(f, "Store image error: {}", msg),
            OocError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for OocError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OocError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OocError {
    fn from(err: io::Error) -> Self {
        OocError::Io(err)
    }
}

impl From<mmap_rs::Error> for OocError {
    fn from(err: mmap_rs::Error) -> Self {
        OocError::Mapping(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for OocError {
    fn from(err: bincode::error::EncodeError) -> Self {
        OocError::Image(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for OocError {
    fn from(err: bincode::error::DecodeError) -> Self {
        OocError::Image(err.to_string())
    }
}
