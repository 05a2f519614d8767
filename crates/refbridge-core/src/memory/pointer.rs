//! Pointer wrappers (Memory Handles)

use super::allocator::MemoryManager;
use crate::error::{BridgeError, BridgeResult};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

/// Who is responsible for releasing an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The wrapper releases the address when finalized
    Owned,
    /// Native code (or another owner) releases the address
    Borrowed,
}

impl Ownership {
    /// Map the adopted flag onto an ownership tag
    pub fn from_adopted(adopted: bool) -> Self {
        if adopted {
            Ownership::Owned
        } else {
            Ownership::Borrowed
        }
    }
}

/// A native address plus its ownership tag
///
/// The address never changes for the lifetime of the wrapper; only the
/// ownership tag may be re-tagged when ownership is transferred explicitly.
///
/// A wrapper also roots every script object whose address has been stored
/// into its bytes, so native memory never holds the address of a cell that
/// was already released. Interior wrappers (a field or an offset into a
/// larger cell) keep their parent alive and record roots on it.
pub struct PointerInstance {
    address: NonNull<u8>,
    ownership: Cell<Ownership>,
    memory: Rc<MemoryManager>,
    /// Enclosing cell and our offset in it
    parent: Option<(Rc<PointerInstance>, usize)>,
    /// Byte offset -> object whose address is stored there
    retained: RefCell<FxHashMap<usize, Value>>,
}

impl PointerInstance {
    pub(crate) fn new(address: NonNull<u8>, ownership: Ownership, memory: Rc<MemoryManager>) -> Self {
        Self {
            address,
            ownership: Cell::new(ownership),
            memory,
            parent: None,
            retained: RefCell::new(FxHashMap::default()),
        }
    }

    /// Borrowed wrapper `offset` bytes into `parent`
    pub(crate) fn interior(parent: &Rc<PointerInstance>, offset: usize) -> BridgeResult<Self> {
        let address = parent.as_usize().wrapping_add(offset);
        let address = NonNull::new(address as *mut u8).ok_or(BridgeError::NullPointer)?;
        Ok(Self {
            address,
            ownership: Cell::new(Ownership::Borrowed),
            memory: parent.memory.clone(),
            parent: Some((parent.clone(), offset)),
            retained: RefCell::new(FxHashMap::default()),
        })
    }

    /// Get the raw address
    #[inline]
    pub fn address(&self) -> NonNull<u8> {
        self.address
    }

    /// Get the address as an integer
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.address.as_ptr() as usize
    }

    /// Get the current ownership tag
    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership.get()
    }

    /// Check whether this wrapper releases the address on finalization
    #[inline]
    pub fn is_adopted(&self) -> bool {
        self.ownership.get() == Ownership::Owned
    }

    /// Re-tag ownership
    ///
    /// # Safety
    ///
    /// When adopting, the address must have come from a `calloc`/`malloc`
    /// compatible allocator, and no other party may release it.
    pub unsafe fn set_adopted(&self, adopted: bool) {
        self.ownership.set(Ownership::from_adopted(adopted));
    }

    /// Enclosing cell, for interior wrappers
    pub fn parent(&self) -> Option<&Rc<PointerInstance>> {
        self.parent.as_ref().map(|(parent, _)| parent)
    }

    /// Bytes known to be addressable from here
    ///
    /// Known for cells the bridge allocated and for interior wrappers of
    /// such cells. `None` for foreign addresses, whose extent is the
    /// caller's responsibility.
    pub fn known_extent(&self) -> Option<usize> {
        match &self.parent {
            Some((parent, offset)) => parent.known_extent().map(|e| e.saturating_sub(*offset)),
            None => self.memory.allocation_size(self.as_usize()),
        }
    }

    /// Fail when `required` bytes are known not to fit
    pub(crate) fn check_extent(&self, ty: &str, required: usize) -> BridgeResult<()> {
        match self.known_extent() {
            Some(available) if available < required => Err(BridgeError::StorageTooSmall {
                ty: ty.to_string(),
                required,
                available,
            }),
            _ => Ok(()),
        }
    }

    /// Address of the byte at `offset`
    pub(crate) fn address_at(&self, offset: usize) -> BridgeResult<NonNull<u8>> {
        NonNull::new(self.as_usize().wrapping_add(offset) as *mut u8).ok_or(BridgeError::NullPointer)
    }

    /// Number of objects rooted by address-bearing bytes
    pub fn retained_count(&self) -> usize {
        match &self.parent {
            Some((parent, _)) => parent.retained_count(),
            None => self.retained.borrow().len(),
        }
    }

    /// Roots stored in `offset..offset + size`, relative to `offset`
    pub(crate) fn retained_in(&self, offset: usize, size: usize) -> Vec<(usize, Value)> {
        if let Some((parent, base)) = &self.parent {
            return parent.retained_in(base + offset, size);
        }
        self.retained
            .borrow()
            .iter()
            .filter(|(slot, _)| **slot >= offset && **slot - offset < size)
            .map(|(&slot, value)| (slot - offset, value.clone()))
            .collect()
    }

    /// Replace the roots in `offset..offset + size`
    ///
    /// `entries` are relative to `offset`.
    pub(crate) fn retain_range(&self, offset: usize, size: usize, entries: Vec<(usize, Value)>) {
        if let Some((parent, base)) = &self.parent {
            return parent.retain_range(base + offset, size, entries);
        }
        // Dropped after the borrow ends; a root may be the last holder of
        // a wrapper that points back here.
        let mut evicted = Vec::new();
        {
            let mut retained = self.retained.borrow_mut();
            let stale: Vec<usize> = retained
                .keys()
                .copied()
                .filter(|&slot| slot >= offset && slot - offset < size)
                .collect();
            for slot in stale {
                evicted.extend(retained.remove(&slot));
            }
            for (rel, value) in entries {
                retained.insert(offset + rel, value);
            }
        }
        drop(evicted);
    }

    /// Handle rooted at `offset`, if any
    pub(crate) fn retained_handle(&self, offset: usize) -> Option<Rc<PointerInstance>> {
        if let Some((parent, base)) = &self.parent {
            return parent.retained_handle(base + offset);
        }
        self.retained.borrow().get(&offset).and_then(Value::handle)
    }

    /// Drop every root held by this cell
    pub(crate) fn clear_retained(&self) {
        let evicted = std::mem::take(&mut *self.retained.borrow_mut());
        drop(evicted);
    }

    /// Release the address immediately if owned
    ///
    /// The wrapper becomes `Borrowed`, so finalization will not release it
    /// again. Returns whether memory was released.
    ///
    /// # Safety
    ///
    /// No other wrapper or native code may use the address afterwards.
    pub(crate) unsafe fn release_now(&self) -> bool {
        if self.ownership.replace(Ownership::Borrowed) == Ownership::Owned {
            self.memory.release(self.address);
            self.clear_retained();
            true
        } else {
            false
        }
    }
}

impl Drop for PointerInstance {
    fn drop(&mut self) {
        if self.ownership.get() == Ownership::Owned {
            unsafe { self.memory.release(self.address) };
        }
    }
}

impl fmt::Debug for PointerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:#x}, {:?})", self.as_usize(), self.ownership.get())
    }
}

impl fmt::Display for PointerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Pointer: {:#x}>", self.as_usize())
    }
}
