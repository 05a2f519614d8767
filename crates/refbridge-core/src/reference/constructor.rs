//! The `Reference` constructor
//!
//! `Reference(type)`, `Reference(type, value)` and `Reference(value)` are
//! resolved here into a [`ReferenceInstance`]. Calling the constructor as a
//! plain function behaves exactly like `new`.
//!
//! # Storage resolution
//!
//! With a type and an initializer, storage is chosen in this order:
//!
//! 1. a Pointer: reuse it (address and ownership)
//! 2. a Record: reuse the record's pointer
//! 3. a Reference: for reference-to-reference types, encode the inner
//!    reference's address into a fresh cell; otherwise reuse its pointer, or
//!    encode its held value when it has no storage yet
//! 4. anything else: allocate `size` zeroed bytes and encode the value
//!
//! Existing storage always wins over allocation, so two wrappers over the
//! same native memory observe each other's writes.
//!
//! Aliased storage must hold at least `size` bytes. The extent is known for
//! bridge allocations, for records (their layout size) and for backed
//! references (their type size); a foreign address handed in by native
//! code has no known extent and is not checked.

use super::instance::ReferenceInstance;
use crate::error::{BridgeError, BridgeResult};
use crate::interop::Interop;
use crate::memory::PointerInstance;
use crate::record::RecordInstance;
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;

/// Declared arity of the constructor
pub const REFERENCE_CONSTRUCTOR_LENGTH: usize = 2;

/// Shape of the second constructor argument, classified once
#[derive(Debug, Clone)]
pub enum Initializer {
    /// No second argument
    Absent,
    /// A pointer wrapper
    Pointer(Rc<PointerInstance>),
    /// A record wrapper
    Record(Rc<RecordInstance>),
    /// Another reference
    Reference(Rc<ReferenceInstance>),
    /// Any other value, to be encoded
    Plain(Value),
}

impl Initializer {
    /// Classify an optional argument
    pub fn classify(arg: Option<&Value>) -> Self {
        match arg {
            None => Initializer::Absent,
            Some(Value::Pointer(p)) => Initializer::Pointer(p.clone()),
            Some(Value::Record(r)) => Initializer::Record(r.clone()),
            Some(Value::Reference(r)) => Initializer::Reference(r.clone()),
            Some(other) => Initializer::Plain(other.clone()),
        }
    }
}

/// Constructible and callable entity producing references
#[derive(Debug, Clone)]
pub struct ReferenceConstructor {
    interop: Rc<Interop>,
}

impl ReferenceConstructor {
    /// Create a constructor bound to an interop context
    pub fn new(interop: Rc<Interop>) -> Self {
        Self { interop }
    }

    /// Constructor name
    pub fn name(&self) -> &'static str {
        "Reference"
    }

    /// Declared arity
    pub fn length(&self) -> usize {
        REFERENCE_CONSTRUCTOR_LENGTH
    }

    /// Get the interop context
    pub fn interop(&self) -> &Rc<Interop> {
        &self.interop
    }

    /// `new Reference(...args)`
    pub fn construct(&self, args: &[Value]) -> BridgeResult<Rc<ReferenceInstance>> {
        if args.len() > REFERENCE_CONSTRUCTOR_LENGTH {
            return Err(BridgeError::InvalidArgumentCount {
                expected: REFERENCE_CONSTRUCTOR_LENGTH,
                got: args.len(),
            });
        }

        let maybe_type = args.first().cloned().unwrap_or_default();
        match self.interop.types().try_resolve(&maybe_type) {
            Some(ty) => {
                let init = Initializer::classify(args.get(1));
                let pointer = self.resolve_storage(&ty, init)?;
                Ok(Rc::new(ReferenceInstance::backed(ty, pointer)?))
            }
            None if args.len() == REFERENCE_CONSTRUCTOR_LENGTH => Err(BridgeError::InvalidType),
            None => {
                tracing::debug!(held = maybe_type.type_name(), "untyped reference");
                Ok(Rc::new(ReferenceInstance::deferred(maybe_type)))
            }
        }
    }

    /// `Reference(...args)`
    pub fn call(&self, args: &[Value]) -> BridgeResult<Rc<ReferenceInstance>> {
        self.construct(args)
    }

    /// Pick or create the storage for a typed reference
    fn resolve_storage(&self, ty: &Arc<TypeDescriptor>, init: Initializer) -> BridgeResult<Rc<PointerInstance>> {
        let value = match init {
            Initializer::Absent => {
                tracing::debug!(ty = ty.name(), "reference over zeroed storage");
                return self.interop.alloc(ty.size());
            }
            Initializer::Pointer(pointer) => {
                tracing::debug!(ty = ty.name(), address = pointer.as_usize(), "reference aliases pointer");
                ty.check_fits(&pointer)?;
                return Ok(pointer);
            }
            Initializer::Record(record) => {
                tracing::debug!(ty = ty.name(), address = record.pointer().as_usize(), "reference aliases record");
                ensure_extent(ty, record.layout().size())?;
                ty.check_fits(record.pointer())?;
                return Ok(record.pointer().clone());
            }
            Initializer::Reference(inner) if ty.is_reference_type() => Value::Reference(inner),
            Initializer::Reference(inner) => match inner.pointer() {
                Some(pointer) => {
                    tracing::debug!(ty = ty.name(), address = pointer.as_usize(), "reference aliases reference");
                    if let Some(inner_ty) = inner.ty() {
                        ensure_extent(ty, inner_ty.size())?;
                    }
                    ty.check_fits(&pointer)?;
                    return Ok(pointer);
                }
                None => inner.value(&self.interop)?,
            },
            Initializer::Plain(value) => value,
        };

        // An encode failure drops `pointer`, releasing the fresh cell.
        let pointer = self.interop.alloc(ty.size())?;
        unsafe { ty.write_at(&self.interop, &value, &pointer, 0)? };
        tracing::debug!(ty = ty.name(), address = pointer.as_usize(), "reference over encoded value");
        Ok(pointer)
    }
}

fn ensure_extent(ty: &TypeDescriptor, available: usize) -> BridgeResult<()> {
    if available < ty.size() {
        return Err(BridgeError::StorageTooSmall {
            ty: ty.name().to_string(),
            required: ty.size(),
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constructor() -> ReferenceConstructor {
        ReferenceConstructor::new(Rc::new(Interop::new()))
    }

    fn int32(ctor: &ReferenceConstructor) -> Value {
        ctor.interop().types().type_value("int32").unwrap()
    }

    #[test]
    fn test_constructor_metadata() {
        let ctor = constructor();
        assert_eq!(ctor.name(), "Reference");
        assert_eq!(ctor.length(), 2);
    }

    #[test]
    fn test_classify() {
        assert!(matches!(Initializer::classify(None), Initializer::Absent));
        assert!(matches!(
            Initializer::classify(Some(&Value::Number(1.0))),
            Initializer::Plain(_)
        ));
        let reference = Rc::new(ReferenceInstance::deferred(Value::Null));
        assert!(matches!(
            Initializer::classify(Some(&Value::Reference(reference))),
            Initializer::Reference(_)
        ));
    }

    #[test]
    fn test_type_only_allocates_zeroed() {
        let ctor = constructor();
        let reference = ctor.construct(&[int32(&ctor)]).unwrap();
        let pointer = reference.pointer().unwrap();
        assert!(pointer.is_adopted());
        assert_eq!(
            ctor.interop().memory().allocation_size(pointer.as_usize()),
            Some(4)
        );
        assert_eq!(reference.value(ctor.interop()).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_call_matches_construct() {
        let ctor = constructor();
        let a = ctor.call(&[int32(&ctor), Value::Number(3.0)]).unwrap();
        let b = ctor.construct(&[int32(&ctor), Value::Number(3.0)]).unwrap();
        assert_eq!(a.value(ctor.interop()).unwrap(), b.value(ctor.interop()).unwrap());
        assert_eq!(a.ty().unwrap().name(), b.ty().unwrap().name());
    }

    #[test]
    fn test_too_many_arguments() {
        let ctor = constructor();
        let err = ctor
            .construct(&[int32(&ctor), Value::Number(1.0), Value::Number(2.0)])
            .unwrap_err();
        assert_eq!(err, BridgeError::InvalidArgumentCount { expected: 2, got: 3 });
    }

    #[test]
    fn test_no_arguments_is_untyped_undefined() {
        let ctor = constructor();
        let reference = ctor.construct(&[]).unwrap();
        assert_eq!(reference.deferred_value(), Some(Value::Undefined));
    }

    #[test]
    fn test_ensure_extent() {
        let double = TypeDescriptor::primitive(crate::types::Primitive::Float64);
        assert!(ensure_extent(&double, 8).is_ok());
        assert_eq!(
            ensure_extent(&double, 4),
            Err(BridgeError::StorageTooSmall {
                ty: "double".to_string(),
                required: 8,
                available: 4
            })
        );
    }

    #[test]
    fn test_encode_failure_releases_cell() {
        let ctor = constructor();
        let err = ctor
            .construct(&[int32(&ctor), Value::string("seven")])
            .unwrap_err();
        assert!(matches!(err, BridgeError::EncodeFailed { .. }));
        let stats = ctor.interop().memory().stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.live_bytes, 0);
    }
}
