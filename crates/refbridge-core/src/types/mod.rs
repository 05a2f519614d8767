//! Native type metadata
//!
//! A [`TypeDescriptor`] gives the byte size of a pointee plus the operations
//! that encode a script value into native memory and decode it back.
//! Descriptors are registered once in a [`TypeRegistry`] and never change.

mod descriptor;
mod layout;
mod registry;

pub use descriptor::{MethodTable, Primitive, TypeDescriptor, TypeKind};
pub use layout::{RecordField, RecordLayout};
pub use registry::{create_standard_registry, standard_registry, TypeRegistry, TypeRegistryBuilder};
