//! Record layouts
//!
//! Offsets, size and alignment are supplied by whoever registers the record
//! type. The bridge only checks that every field fits inside the record.

use super::descriptor::TypeDescriptor;
use crate::error::{BridgeError, BridgeResult};
use std::sync::Arc;

/// A named field at a fixed byte offset
#[derive(Debug, Clone)]
pub struct RecordField {
    /// Field name
    pub name: String,

    /// Byte offset from the start of the record
    pub offset: usize,

    /// Field type
    pub ty: Arc<TypeDescriptor>,
}

impl RecordField {
    /// Create a field
    pub fn new(name: impl Into<String>, offset: usize, ty: Arc<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            offset,
            ty,
        }
    }
}

/// Memory layout of a native struct
#[derive(Debug, Clone)]
pub struct RecordLayout {
    name: String,
    size: usize,
    align: usize,
    fields: Vec<RecordField>,
}

impl RecordLayout {
    /// Create a layout, validating that fields fit
    pub fn new(
        name: impl Into<String>,
        size: usize,
        align: usize,
        fields: Vec<RecordField>,
    ) -> BridgeResult<Self> {
        let name = name.into();
        if size == 0 {
            return Err(BridgeError::InvalidDescriptor(format!(
                "record {} has zero size",
                name
            )));
        }
        if !align.is_power_of_two() {
            return Err(BridgeError::InvalidDescriptor(format!(
                "record {} has alignment {} which is not a power of two",
                name, align
            )));
        }
        for field in &fields {
            let end = field.offset.checked_add(field.ty.size());
            if end.map_or(true, |end| end > size) {
                return Err(BridgeError::InvalidDescriptor(format!(
                    "field {}.{} at offset {} overruns record size {}",
                    name, field.name, field.offset, size
                )));
            }
        }
        Ok(Self {
            name,
            size,
            align,
            fields,
        })
    }

    /// Record name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes
    pub fn align(&self) -> usize {
        self.align
    }

    /// All fields in declaration order
    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a record of `other` can be copied into this layout
    pub fn is_compatible(&self, other: &RecordLayout) -> bool {
        std::ptr::eq(self, other) || (self.name == other.name && self.size == other.size)
    }
}
