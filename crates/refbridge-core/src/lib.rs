//! Reference bridge core
//!
//! This crate lets script code hold typed, addressable cells over native
//! memory:
//! - Pointer wrappers with explicit ownership (owned or borrowed)
//! - Type descriptors that encode and decode script values
//! - Record wrappers over native structs
//! - References and the `Reference` constructor
//! - An interop context with allocation limits and a wrapper cache

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod value;
pub mod options;
pub mod memory;
pub mod types;
pub mod record;
pub mod reference;
pub mod interop;

pub use error::{BridgeError, BridgeResult};
pub use value::Value;
pub use options::{BridgeOptions, MemoryLimits, OptionsError};
pub use memory::{Allocator, MemoryManager, MemoryStats, Ownership, PointerInstance, SystemAllocator};
pub use types::{
    create_standard_registry, standard_registry, MethodTable, Primitive, RecordField, RecordLayout,
    TypeDescriptor, TypeKind, TypeRegistry, TypeRegistryBuilder,
};
pub use record::RecordInstance;
pub use reference::{Initializer, ReferenceConstructor, ReferenceInstance, ReferenceState, REFERENCE_CONSTRUCTOR_LENGTH};
pub use interop::Interop;
