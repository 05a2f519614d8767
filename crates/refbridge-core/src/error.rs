//! Error types for reference construction and native cell access

use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while constructing or accessing native cells
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A non-type value was passed as the pointee type together with an initializer
    #[error("Not a valid type object is passed as parameter.")]
    InvalidType,

    /// Wrong number of arguments to a constructor
    #[error("Expected at most {expected} arguments, got {got}")]
    InvalidArgumentCount {
        /// Maximum accepted arguments
        expected: usize,
        /// Arguments supplied
        got: usize,
    },

    /// The type's encoder rejected the value
    #[error("Cannot encode {got} as {ty}")]
    EncodeFailed {
        /// Target type name
        ty: String,
        /// Script type name of the rejected value
        got: String,
    },

    /// The allocator could not satisfy the request
    #[error("Failed to allocate {size} bytes")]
    AllocationFailed {
        /// Requested size in bytes
        size: usize,
    },

    /// A configured memory limit would be exceeded
    #[error("Memory limit exceeded: requested {requested} bytes, limit is {limit}")]
    LimitExceeded {
        /// Requested size in bytes
        requested: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// A type descriptor was built with inconsistent metadata
    #[error("Invalid type descriptor: {0}")]
    InvalidDescriptor(String),

    /// Field name not present in a record layout
    #[error("Record {record} has no field named {field}")]
    UnknownField {
        /// Record type name
        record: String,
        /// Requested field
        field: String,
    },

    /// Existing storage is smaller than the type placed over it
    #[error("{ty} needs {required} bytes but the storage holds {available}")]
    StorageTooSmall {
        /// Type or record name
        ty: String,
        /// Bytes the type needs
        required: usize,
        /// Bytes known to be addressable
        available: usize,
    },

    /// A null address was dereferenced
    #[error("Null pointer dereference")]
    NullPointer,
}
