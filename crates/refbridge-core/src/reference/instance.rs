//! Reference instances: addressable typed cells

use crate::error::BridgeResult;
use crate::interop::Interop;
use crate::memory::PointerInstance;
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

/// Storage state of a reference
///
/// A reference without a type cannot size its storage, so it holds the
/// value directly until first typed use. Once backed, the pointer is never
/// replaced.
#[derive(Clone)]
pub enum ReferenceState {
    /// No storage yet; the value is held by the reference itself
    Deferred(Value),

    /// Storage of exactly `ty.size()` bytes at `pointer`
    Backed {
        /// Pointee type
        ty: Arc<TypeDescriptor>,
        /// Backing storage
        pointer: Rc<PointerInstance>,
    },
}

/// An addressable cell shared between script and native code
pub struct ReferenceInstance {
    state: RefCell<ReferenceState>,
}

impl ReferenceInstance {
    /// Create an untyped reference holding `value`
    pub fn deferred(value: Value) -> Self {
        Self {
            state: RefCell::new(ReferenceState::Deferred(value)),
        }
    }

    /// Create a reference over existing storage
    ///
    /// Fails when the storage is known to be smaller than `ty`.
    pub fn backed(ty: Arc<TypeDescriptor>, pointer: Rc<PointerInstance>) -> BridgeResult<Self> {
        ty.check_fits(&pointer)?;
        Ok(Self {
            state: RefCell::new(ReferenceState::Backed { ty, pointer }),
        })
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ReferenceState {
        self.state.borrow().clone()
    }

    /// Pointee type, absent while deferred
    pub fn ty(&self) -> Option<Arc<TypeDescriptor>> {
        match &*self.state.borrow() {
            ReferenceState::Backed { ty, .. } => Some(ty.clone()),
            ReferenceState::Deferred(_) => None,
        }
    }

    /// Backing pointer, absent while deferred
    pub fn pointer(&self) -> Option<Rc<PointerInstance>> {
        match &*self.state.borrow() {
            ReferenceState::Backed { pointer, .. } => Some(pointer.clone()),
            ReferenceState::Deferred(_) => None,
        }
    }

    /// Backing address, absent while deferred
    pub fn address(&self) -> Option<NonNull<u8>> {
        self.pointer().map(|p| p.address())
    }

    /// Check whether storage is attached
    pub fn is_backed(&self) -> bool {
        matches!(&*self.state.borrow(), ReferenceState::Backed { .. })
    }

    /// The held value of a deferred reference
    pub fn deferred_value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            ReferenceState::Deferred(value) => Some(value.clone()),
            ReferenceState::Backed { .. } => None,
        }
    }

    /// Current value: decoded from storage, or the held value
    pub fn value(&self, interop: &Interop) -> BridgeResult<Value> {
        match self.state() {
            ReferenceState::Backed { ty, pointer } => unsafe { ty.read_at(interop, &pointer, 0) },
            ReferenceState::Deferred(value) => Ok(value),
        }
    }

    /// Store a value: encoded into storage, or held until storage exists
    pub fn set_value(&self, interop: &Interop, value: Value) -> BridgeResult<()> {
        let backing = match &mut *self.state.borrow_mut() {
            ReferenceState::Backed { ty, pointer } => (ty.clone(), pointer.clone()),
            ReferenceState::Deferred(held) => {
                *held = value;
                return Ok(());
            }
        };
        let (ty, pointer) = backing;
        unsafe { ty.write_at(interop, &value, &pointer, 0) }
    }

    /// Attach storage for `ty` on first typed use
    ///
    /// A deferred reference allocates `ty.size()` zeroed bytes and encodes
    /// its held value there (`undefined` leaves the cell zeroed). A backed
    /// reference returns its existing pointer unchanged.
    pub fn materialize(&self, interop: &Interop, ty: &Arc<TypeDescriptor>) -> BridgeResult<Rc<PointerInstance>> {
        let held = match &*self.state.borrow() {
            ReferenceState::Backed { pointer, .. } => return Ok(pointer.clone()),
            ReferenceState::Deferred(value) => value.clone(),
        };

        let pointer = interop.alloc(ty.size())?;

        // Attach before encoding so a held value that points back at this
        // reference sees its final address.
        self.state.replace(ReferenceState::Backed {
            ty: ty.clone(),
            pointer: pointer.clone(),
        });

        if !held.is_undefined() {
            if let Err(err) = unsafe { ty.write_at(interop, &held, &pointer, 0) } {
                self.state.replace(ReferenceState::Deferred(held));
                return Err(err);
            }
        }

        tracing::debug!(ty = ty.name(), address = pointer.as_usize(), "materialized reference");
        Ok(pointer)
    }
}

impl fmt::Debug for ReferenceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            ReferenceState::Backed { ty, pointer } => f
                .debug_struct("ReferenceInstance")
                .field("ty", &ty.name())
                .field("pointer", pointer)
                .finish(),
            ReferenceState::Deferred(value) => f
                .debug_struct("ReferenceInstance")
                .field("deferred", value)
                .finish(),
        }
    }
}

impl fmt::Display for ReferenceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            ReferenceState::Backed { pointer, .. } => write!(f, "<Reference: {:#x}>", pointer.as_usize()),
            ReferenceState::Deferred(_) => write!(f, "<Reference: deferred>"),
        }
    }
}
