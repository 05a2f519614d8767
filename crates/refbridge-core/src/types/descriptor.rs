//! Type descriptors: size plus encode/decode for a native type

use super::layout::RecordLayout;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::Interop;
use crate::memory::PointerInstance;
use crate::record::RecordInstance;
use crate::reference::ReferenceInstance;
use crate::value::Value;
use std::fmt;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::Arc;

/// Largest integer magnitude a double represents exactly (2^53)
const MAX_SAFE_INTEGER: i128 = 9_007_199_254_740_992;

/// Encode/decode for types supplied from outside the bridge
///
/// Implementations must touch exactly `ty.size()` bytes of the buffer.
pub trait MethodTable: Send + Sync {
    /// Decode a value from `buffer`
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads of `ty.size()` bytes.
    unsafe fn read(&self, interop: &Interop, ty: &TypeDescriptor, buffer: NonNull<u8>) -> BridgeResult<Value>;

    /// Encode `value` into `buffer`
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for writes of `ty.size()` bytes.
    unsafe fn write(
        &self,
        interop: &Interop,
        ty: &TypeDescriptor,
        value: &Value,
        buffer: NonNull<u8>,
    ) -> BridgeResult<()>;
}

/// Built-in scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// C `bool`, one byte
    Bool,
    /// `int8_t`
    Int8,
    /// `uint8_t`
    Uint8,
    /// `int16_t`
    Int16,
    /// `uint16_t`
    Uint16,
    /// `int32_t`
    Int32,
    /// `uint32_t`
    Uint32,
    /// `int64_t`
    Int64,
    /// `uint64_t`
    Uint64,
    /// `float`
    Float32,
    /// `double`
    Float64,
    /// `void *`
    Pointer,
}

impl Primitive {
    /// All primitives, in registration order
    pub const ALL: [Primitive; 12] = [
        Primitive::Bool,
        Primitive::Int8,
        Primitive::Uint8,
        Primitive::Int16,
        Primitive::Uint16,
        Primitive::Int32,
        Primitive::Uint32,
        Primitive::Int64,
        Primitive::Uint64,
        Primitive::Float32,
        Primitive::Float64,
        Primitive::Pointer,
    ];

    /// Registry name
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int8 => "int8",
            Primitive::Uint8 => "uint8",
            Primitive::Int16 => "int16",
            Primitive::Uint16 => "uint16",
            Primitive::Int32 => "int32",
            Primitive::Uint32 => "uint32",
            Primitive::Int64 => "int64",
            Primitive::Uint64 => "uint64",
            Primitive::Float32 => "float",
            Primitive::Float64 => "double",
            Primitive::Pointer => "pointer",
        }
    }

    /// Size in bytes
    pub fn size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::Int8 | Primitive::Uint8 => 1,
            Primitive::Int16 | Primitive::Uint16 => 2,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Float32 => 4,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Float64 => 8,
            Primitive::Pointer => size_of::<usize>(),
        }
    }

    /// Alignment in bytes
    pub fn align(self) -> usize {
        match self {
            Primitive::Pointer => align_of::<usize>(),
            other => other.size(),
        }
    }
}

/// What a descriptor describes
#[derive(Clone)]
pub enum TypeKind {
    /// Built-in scalar
    Primitive(Primitive),

    /// Reference-to-T; pointer sized. `None` when T is unknown.
    Reference(Option<Arc<TypeDescriptor>>),

    /// Native struct with caller-supplied layout
    Record(Arc<RecordLayout>),

    /// Externally supplied encode/decode
    Custom(Arc<dyn MethodTable>),
}

/// Type-erased metadata for a native type
///
/// Immutable once built; shared as `Arc<TypeDescriptor>`.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    size: usize,
    align: usize,
    kind: TypeKind,
}

impl TypeDescriptor {
    /// Descriptor for a built-in scalar
    pub fn primitive(primitive: Primitive) -> Self {
        Self {
            name: primitive.name().to_string(),
            size: primitive.size(),
            align: primitive.align(),
            kind: TypeKind::Primitive(primitive),
        }
    }

    /// Descriptor for a reference-to-`inner` type
    pub fn reference_to(inner: Option<Arc<TypeDescriptor>>) -> Self {
        let name = match &inner {
            Some(t) => format!("ref<{}>", t.name),
            None => "ref<?>".to_string(),
        };
        Self {
            name,
            size: size_of::<usize>(),
            align: align_of::<usize>(),
            kind: TypeKind::Reference(inner),
        }
    }

    /// Descriptor for a record type
    pub fn record(layout: Arc<RecordLayout>) -> Self {
        Self {
            name: layout.name().to_string(),
            size: layout.size(),
            align: layout.align(),
            kind: TypeKind::Record(layout),
        }
    }

    /// Descriptor backed by an external method table
    pub fn custom(
        name: impl Into<String>,
        size: usize,
        align: usize,
        table: Arc<dyn MethodTable>,
    ) -> BridgeResult<Self> {
        let name = name.into();
        if size == 0 {
            return Err(BridgeError::InvalidDescriptor(format!(
                "type {} has zero size",
                name
            )));
        }
        if !align.is_power_of_two() {
            return Err(BridgeError::InvalidDescriptor(format!(
                "type {} has alignment {} which is not a power of two",
                name, align
            )));
        }
        Ok(Self {
            name,
            size,
            align,
            kind: TypeKind::Custom(table),
        })
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the pointee in bytes (always > 0)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes
    pub fn align(&self) -> usize {
        self.align
    }

    /// Descriptor kind
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Check whether this is a reference-to-T type
    pub fn is_reference_type(&self) -> bool {
        matches!(self.kind, TypeKind::Reference(_))
    }

    /// Record layout, if this is a record type
    pub fn record_layout(&self) -> Option<&Arc<RecordLayout>> {
        match &self.kind {
            TypeKind::Record(layout) => Some(layout),
            _ => None,
        }
    }

    /// Check whether values of this type may store an address
    pub fn stores_address(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Reference(_) | TypeKind::Primitive(Primitive::Pointer) | TypeKind::Custom(_)
        )
    }

    /// Fail when `pointer` is known to hold fewer than `size` bytes
    pub fn check_fits(&self, pointer: &PointerInstance) -> BridgeResult<()> {
        pointer.check_extent(&self.name, self.size)
    }

    /// Decode the value stored at `buffer`
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads of `self.size()` bytes.
    pub unsafe fn read(&self, interop: &Interop, buffer: NonNull<u8>) -> BridgeResult<Value> {
        match &self.kind {
            TypeKind::Primitive(p) => Ok(read_primitive(interop, *p, buffer)),
            TypeKind::Reference(_) => {
                let addr = usize::from_ne_bytes(load(buffer));
                match NonNull::new(addr as *mut u8) {
                    Some(addr) => self.wrap_address(interop.pointer_for_address(addr)),
                    None => Ok(Value::Null),
                }
            }
            TypeKind::Record(layout) => {
                let pointer = interop.pointer_for_address(buffer);
                Ok(Value::Record(Rc::new(RecordInstance::at(layout.clone(), pointer)?)))
            }
            TypeKind::Custom(table) => table.read(interop, self, buffer),
        }
    }

    /// Decode the value stored `offset` bytes into `pointer`
    ///
    /// Records decode over an interior wrapper that keeps `pointer` alive.
    /// Stored addresses resolve to the wrapper rooted in that slot.
    ///
    /// # Safety
    ///
    /// `offset + self.size()` bytes must be addressable from `pointer`.
    pub(crate) unsafe fn read_at(
        &self,
        interop: &Interop,
        pointer: &Rc<PointerInstance>,
        offset: usize,
    ) -> BridgeResult<Value> {
        let buffer = pointer.address_at(offset)?;
        match &self.kind {
            TypeKind::Record(layout) => {
                let inner = interop.interior_pointer(pointer, offset)?;
                Ok(Value::Record(Rc::new(RecordInstance::at(layout.clone(), inner)?)))
            }
            TypeKind::Reference(_) | TypeKind::Primitive(Primitive::Pointer) => {
                let addr = usize::from_ne_bytes(load(buffer));
                match pointer.retained_handle(offset) {
                    Some(handle) if addr != 0 && handle.as_usize() == addr => self.wrap_address(handle),
                    _ => self.read(interop, buffer),
                }
            }
            _ => self.read(interop, buffer),
        }
    }

    /// Encode `value` into `buffer`, touching exactly `self.size()` bytes
    ///
    /// Stores through a raw buffer do not root the objects whose addresses
    /// they write; prefer the handle-based paths of references and records.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for writes of `self.size()` bytes, and every
    /// address stored must outlive its use by native code.
    pub unsafe fn write(&self, interop: &Interop, value: &Value, buffer: NonNull<u8>) -> BridgeResult<()> {
        match &self.kind {
            TypeKind::Primitive(p) => write_primitive(self, *p, value, buffer),
            TypeKind::Reference(inner) => {
                let handle = match value {
                    Value::Undefined | Value::Null => None,
                    Value::Reference(r) if !r.is_backed() => {
                        let ty = inner.as_ref().ok_or_else(|| self.encode_error(value))?;
                        Some(r.materialize(interop, ty)?)
                    }
                    other => Some(other.handle().ok_or_else(|| self.encode_error(value))?),
                };
                if let (Some(ty), Some(handle)) = (inner, &handle) {
                    ty.check_fits(handle)?;
                }
                let addr = handle.map_or(0, |p| p.as_usize());
                store(buffer, addr.to_ne_bytes());
                Ok(())
            }
            TypeKind::Record(layout) => match value {
                Value::Undefined => {
                    ptr::write_bytes(buffer.as_ptr(), 0, self.size);
                    Ok(())
                }
                Value::Record(r) if r.layout().is_compatible(layout) => {
                    // Source and destination may be the same cell.
                    ptr::copy(r.address().as_ptr(), buffer.as_ptr(), self.size);
                    Ok(())
                }
                _ => Err(self.encode_error(value)),
            },
            TypeKind::Custom(table) => table.write(interop, self, value, buffer),
        }
    }

    /// Encode `value` `offset` bytes into `pointer` and root what it stores
    ///
    /// Every object whose address lands in the written bytes stays alive as
    /// long as `pointer`'s cell does. A record copy carries the source's
    /// roots along with its bytes.
    ///
    /// # Safety
    ///
    /// `offset + self.size()` bytes must be addressable from `pointer`.
    pub(crate) unsafe fn write_at(
        &self,
        interop: &Interop,
        value: &Value,
        pointer: &Rc<PointerInstance>,
        offset: usize,
    ) -> BridgeResult<()> {
        let buffer = pointer.address_at(offset)?;
        let copied = match (&self.kind, value) {
            (TypeKind::Record(_), Value::Record(r)) => Some(r.pointer().retained_in(0, self.size)),
            _ => None,
        };

        self.write(interop, value, buffer)?;

        let roots = match copied {
            Some(roots) => roots,
            None if self.stores_address() && value.handle().is_some() => vec![(0, value.clone())],
            None => Vec::new(),
        };
        pointer.retain_range(offset, self.size, roots);
        Ok(())
    }

    fn wrap_address(&self, pointer: Rc<PointerInstance>) -> BridgeResult<Value> {
        Ok(match &self.kind {
            TypeKind::Reference(Some(ty)) => {
                Value::Reference(Rc::new(ReferenceInstance::backed(ty.clone(), pointer)?))
            }
            _ => Value::Pointer(pointer),
        })
    }

    pub(crate) fn encode_error(&self, value: &Value) -> BridgeError {
        BridgeError::EncodeFailed {
            ty: self.name.clone(),
            got: value.type_name().to_string(),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            TypeKind::Primitive(_) => "primitive",
            TypeKind::Reference(_) => "reference",
            TypeKind::Record(_) => "record",
            TypeKind::Custom(_) => "custom",
        };
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("kind", &kind)
            .finish()
    }
}

#[inline]
unsafe fn store<const N: usize>(buffer: NonNull<u8>, bytes: [u8; N]) {
    ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_ptr(), N);
}

#[inline]
unsafe fn load<const N: usize>(buffer: NonNull<u8>) -> [u8; N] {
    let mut bytes = [0u8; N];
    ptr::copy_nonoverlapping(buffer.as_ptr(), bytes.as_mut_ptr(), N);
    bytes
}

/// Integer payload of a value, before truncation to the target width
fn integer_bits(value: &Value) -> Option<i128> {
    match value {
        Value::Undefined | Value::Null => Some(0),
        Value::Number(n) if n.is_finite() => Some(n.trunc() as i128),
        Value::Number(_) => Some(0),
        Value::BigInt(i) => Some(*i),
        Value::Bool(b) => Some(*b as i128),
        _ => None,
    }
}

fn float_bits(value: &Value) -> Option<f64> {
    match value {
        Value::Undefined | Value::Null => Some(0.0),
        Value::Number(n) => Some(*n),
        Value::BigInt(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn int64_value(i: i128) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&i) {
        Value::Number(i as f64)
    } else {
        Value::BigInt(i)
    }
}

unsafe fn write_primitive(
    ty: &TypeDescriptor,
    primitive: Primitive,
    value: &Value,
    buffer: NonNull<u8>,
) -> BridgeResult<()> {
    let bits = || integer_bits(value).ok_or_else(|| ty.encode_error(value));
    match primitive {
        Primitive::Bool => {
            let b = match value {
                Value::Undefined | Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => *n != 0.0 && !n.is_nan(),
                _ => return Err(ty.encode_error(value)),
            };
            store(buffer, [b as u8]);
        }
        Primitive::Float32 => {
            let f = float_bits(value).ok_or_else(|| ty.encode_error(value))?;
            store(buffer, (f as f32).to_ne_bytes());
        }
        Primitive::Float64 => {
            let f = float_bits(value).ok_or_else(|| ty.encode_error(value))?;
            store(buffer, f.to_ne_bytes());
        }
        Primitive::Pointer => {
            let addr = match value {
                Value::Undefined | Value::Null => 0,
                Value::Pointer(_) | Value::Record(_) | Value::Reference(_) => {
                    value.handle().ok_or_else(|| ty.encode_error(value))?.as_usize()
                }
                _ => return Err(ty.encode_error(value)),
            };
            store(buffer, addr.to_ne_bytes());
        }
        Primitive::Int8 => store(buffer, (bits()? as i8).to_ne_bytes()),
        Primitive::Uint8 => store(buffer, (bits()? as u8).to_ne_bytes()),
        Primitive::Int16 => store(buffer, (bits()? as i16).to_ne_bytes()),
        Primitive::Uint16 => store(buffer, (bits()? as u16).to_ne_bytes()),
        Primitive::Int32 => store(buffer, (bits()? as i32).to_ne_bytes()),
        Primitive::Uint32 => store(buffer, (bits()? as u32).to_ne_bytes()),
        Primitive::Int64 => store(buffer, (bits()? as i64).to_ne_bytes()),
        Primitive::Uint64 => store(buffer, (bits()? as u64).to_ne_bytes()),
    }
    Ok(())
}

unsafe fn read_primitive(interop: &Interop, primitive: Primitive, buffer: NonNull<u8>) -> Value {
    match primitive {
        Primitive::Bool => Value::Bool(load::<1>(buffer)[0] != 0),
        Primitive::Int8 => Value::Number(i8::from_ne_bytes(load(buffer)) as f64),
        Primitive::Uint8 => Value::Number(u8::from_ne_bytes(load(buffer)) as f64),
        Primitive::Int16 => Value::Number(i16::from_ne_bytes(load(buffer)) as f64),
        Primitive::Uint16 => Value::Number(u16::from_ne_bytes(load(buffer)) as f64),
        Primitive::Int32 => Value::Number(i32::from_ne_bytes(load(buffer)) as f64),
        Primitive::Uint32 => Value::Number(u32::from_ne_bytes(load(buffer)) as f64),
        Primitive::Int64 => int64_value(i64::from_ne_bytes(load(buffer)) as i128),
        Primitive::Uint64 => int64_value(u64::from_ne_bytes(load(buffer)) as i128),
        Primitive::Float32 => Value::Number(f32::from_ne_bytes(load(buffer)) as f64),
        Primitive::Float64 => Value::Number(f64::from_ne_bytes(load(buffer))),
        Primitive::Pointer => {
            let addr = usize::from_ne_bytes(load(buffer));
            match NonNull::new(addr as *mut u8) {
                Some(addr) => Value::Pointer(interop.pointer_for_address(addr)),
                None => Value::Null,
            }
        }
    }
}
