//! Record instances: script wrappers over native struct storage

use crate::error::{BridgeError, BridgeResult};
use crate::interop::Interop;
use crate::memory::PointerInstance;
use crate::types::{RecordField, RecordLayout};
use crate::value::Value;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

/// A native struct exposed to script code
///
/// The record does not own memory itself. Its pointer wrapper decides
/// whether the storage is released when the last holder goes away.
pub struct RecordInstance {
    layout: Arc<RecordLayout>,
    pointer: Rc<PointerInstance>,
}

impl RecordInstance {
    /// Wrap existing storage
    ///
    /// The record inherits the pointer's ownership tag. Fails when the
    /// storage is known to be smaller than the layout.
    pub fn at(layout: Arc<RecordLayout>, pointer: Rc<PointerInstance>) -> BridgeResult<Self> {
        pointer.check_extent(layout.name(), layout.size())?;
        Ok(Self { layout, pointer })
    }

    /// Get the layout
    pub fn layout(&self) -> &Arc<RecordLayout> {
        &self.layout
    }

    /// Get the storage pointer
    pub fn pointer(&self) -> &Rc<PointerInstance> {
        &self.pointer
    }

    /// Get the storage address
    pub fn address(&self) -> NonNull<u8> {
        self.pointer.address()
    }

    /// Read a field
    ///
    /// Nested records share this record's storage and keep it alive.
    pub fn get_field(&self, interop: &Interop, name: &str) -> BridgeResult<Value> {
        let field = self.field(name)?;
        // Layout validation guarantees offset + size <= record size.
        unsafe { field.ty.read_at(interop, &self.pointer, field.offset) }
    }

    /// Write a field
    pub fn set_field(&self, interop: &Interop, name: &str, value: &Value) -> BridgeResult<()> {
        let field = self.field(name)?;
        unsafe { field.ty.write_at(interop, value, &self.pointer, field.offset) }
    }

    fn field(&self, name: &str) -> BridgeResult<&RecordField> {
        self.layout.field(name).ok_or_else(|| BridgeError::UnknownField {
            record: self.layout.name().to_string(),
            field: name.to_string(),
        })
    }
}

impl fmt::Debug for RecordInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordInstance")
            .field("layout", &self.layout.name())
            .field("pointer", &self.pointer)
            .finish()
    }
}

impl fmt::Display for RecordInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {:#x}>", self.layout.name(), self.pointer.as_usize())
    }
}
