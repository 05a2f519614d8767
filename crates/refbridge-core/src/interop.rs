//! Interop context
//!
//! One `Interop` exists per script runtime. It owns the allocator front,
//! shares the process-wide type registry, and keeps at most one live
//! pointer wrapper per native address so that ownership of an address is
//! never split between two wrappers.

use crate::error::{BridgeError, BridgeResult};
use crate::memory::{Allocator, MemoryManager, Ownership, PointerInstance, SystemAllocator};
use crate::options::{BridgeOptions, OptionsError};
use crate::record::RecordInstance;
use crate::reference::ReferenceConstructor;
use crate::types::{standard_registry, RecordLayout, TypeRegistry};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Cache size at which dead entries are first swept
const INITIAL_PRUNE_THRESHOLD: usize = 64;

/// Bridge context shared by every wrapper of one runtime
pub struct Interop {
    types: Arc<TypeRegistry>,
    memory: Rc<MemoryManager>,
    options: BridgeOptions,
    /// Address -> live wrapper
    pointers: RefCell<FxHashMap<usize, Weak<PointerInstance>>>,
    prune_threshold: Cell<usize>,
}

impl Interop {
    /// Create a context with default options and the standard registry
    pub fn new() -> Self {
        Self::build(BridgeOptions::default(), standard_registry(), Box::new(SystemAllocator))
    }

    /// Create a context with specific options, registry and allocator
    ///
    /// The options are validated first.
    pub fn with_options(
        options: BridgeOptions,
        types: Arc<TypeRegistry>,
        allocator: Box<dyn Allocator>,
    ) -> Result<Self, OptionsError> {
        options.validate()?;
        Ok(Self::build(options, types, allocator))
    }

    fn build(options: BridgeOptions, types: Arc<TypeRegistry>, allocator: Box<dyn Allocator>) -> Self {
        let memory = Rc::new(MemoryManager::new(allocator, options.limits.clone()));
        Self {
            types,
            memory,
            options,
            pointers: RefCell::new(FxHashMap::default()),
            prune_threshold: Cell::new(INITIAL_PRUNE_THRESHOLD),
        }
    }

    /// Get the type registry
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Get the memory manager
    pub fn memory(&self) -> &Rc<MemoryManager> {
        &self.memory
    }

    /// Get the options
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Number of live cached pointer wrappers
    pub fn cached_pointer_count(&self) -> usize {
        self.pointers
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Allocate `size` zeroed bytes owned by the returned wrapper
    pub fn alloc(&self, size: usize) -> BridgeResult<Rc<PointerInstance>> {
        let addr = self.memory.allocate_zeroed(size)?;

        // Native code may have freed an address we still wrap as borrowed;
        // the fresh allocation takes that wrapper over.
        if let Some(existing) = self.cached(addr) {
            // SAFETY: the memory manager just handed out this block.
            unsafe { existing.set_adopted(true) };
            existing.clear_retained();
            return Ok(existing);
        }

        let pointer = Rc::new(PointerInstance::new(addr, Ownership::Owned, self.memory.clone()));
        self.remember(&pointer);
        Ok(pointer)
    }

    /// Wrap an address supplied by native code
    ///
    /// Returns the existing wrapper when one is alive, otherwise a new
    /// `Borrowed` wrapper.
    ///
    /// # Safety
    ///
    /// The address must stay valid for every typed access made through the
    /// returned wrapper.
    pub unsafe fn pointer_for_address(&self, addr: NonNull<u8>) -> Rc<PointerInstance> {
        if let Some(existing) = self.cached(addr) {
            return existing;
        }
        let pointer = Rc::new(PointerInstance::new(addr, Ownership::Borrowed, self.memory.clone()));
        self.remember(&pointer);
        pointer
    }

    /// Wrap `pointer + bytes` as a borrowed address
    ///
    /// A forward offset yields an interior wrapper that keeps `pointer`
    /// alive. A backward offset is treated as a foreign address.
    ///
    /// # Safety
    ///
    /// Same contract as [`Interop::pointer_for_address`] for the resulting
    /// address.
    pub unsafe fn offset_pointer(&self, pointer: &Rc<PointerInstance>, bytes: isize) -> BridgeResult<Rc<PointerInstance>> {
        if bytes >= 0 {
            return self.interior_pointer(pointer, bytes as usize);
        }
        let addr = (pointer.as_usize() as isize).wrapping_add(bytes) as usize;
        let addr = NonNull::new(addr as *mut u8).ok_or(BridgeError::NullPointer)?;
        Ok(self.pointer_for_address(addr))
    }

    /// Borrowed wrapper for `offset` bytes into `parent`
    ///
    /// Interior wrappers are not cached; the base address keeps its owner.
    pub(crate) fn interior_pointer(&self, parent: &Rc<PointerInstance>, offset: usize) -> BridgeResult<Rc<PointerInstance>> {
        if offset == 0 {
            return Ok(parent.clone());
        }
        Ok(Rc::new(PointerInstance::interior(parent, offset)?))
    }

    /// Release an owned pointer now
    ///
    /// The wrapper becomes borrowed so its finalization does nothing.
    /// Returns whether memory was released.
    ///
    /// # Safety
    ///
    /// Nothing may access the address afterwards.
    pub unsafe fn free(&self, pointer: &PointerInstance) -> bool {
        pointer.release_now()
    }

    /// Transfer ownership of `pointer` to the bridge
    ///
    /// # Safety
    ///
    /// See [`PointerInstance::set_adopted`].
    pub unsafe fn adopt(&self, pointer: &PointerInstance) {
        pointer.set_adopted(true);
    }

    /// Size of a type object, or of the native value behind a wrapper
    pub fn sizeof(&self, value: &Value) -> BridgeResult<usize> {
        match value {
            Value::Type(ty) => Ok(ty.size()),
            Value::Record(record) => Ok(record.layout().size()),
            Value::Pointer(_) | Value::Reference(_) => Ok(size_of::<usize>()),
            _ => Err(BridgeError::InvalidType),
        }
    }

    /// The pointer wrapper behind a pointer, record or backed reference
    pub fn handleof(&self, value: &Value) -> Option<Rc<PointerInstance>> {
        value.handle()
    }

    /// The `Reference` constructor bound to this context
    pub fn reference_constructor(self: &Rc<Self>) -> ReferenceConstructor {
        ReferenceConstructor::new(self.clone())
    }

    /// Allocate a zeroed, owned record
    pub fn new_record(&self, layout: &Arc<RecordLayout>) -> BridgeResult<Rc<RecordInstance>> {
        let pointer = self.alloc(layout.size())?;
        Ok(Rc::new(RecordInstance::at(layout.clone(), pointer)?))
    }

    fn cached(&self, addr: NonNull<u8>) -> Option<Rc<PointerInstance>> {
        if !self.options.cache_pointers {
            return None;
        }
        self.pointers
            .borrow()
            .get(&(addr.as_ptr() as usize))
            .and_then(Weak::upgrade)
    }

    fn remember(&self, pointer: &Rc<PointerInstance>) {
        if !self.options.cache_pointers {
            return;
        }
        let mut pointers = self.pointers.borrow_mut();
        pointers.insert(pointer.as_usize(), Rc::downgrade(pointer));

        if pointers.len() >= self.prune_threshold.get() {
            pointers.retain(|_, w| w.strong_count() > 0);
            self.prune_threshold
                .set((pointers.len() * 2).max(INITIAL_PRUNE_THRESHOLD));
        }
    }
}

impl Default for Interop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interop")
            .field("types", &self.types.len())
            .field("memory", &self.memory)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MemoryLimits;
    use crate::types::{Primitive, TypeDescriptor};

    #[test]
    fn test_alloc_is_owned_and_cached() {
        let interop = Interop::new();
        let pointer = interop.alloc(8).unwrap();
        assert!(pointer.is_adopted());
        assert_eq!(interop.cached_pointer_count(), 1);

        let again = unsafe { interop.pointer_for_address(pointer.address()) };
        assert!(Rc::ptr_eq(&pointer, &again));
    }

    #[test]
    fn test_foreign_address_is_borrowed() {
        let interop = Interop::new();
        let mut slot = 0u64;
        let addr = NonNull::from(&mut slot).cast::<u8>();
        let pointer = unsafe { interop.pointer_for_address(addr) };
        assert!(!pointer.is_adopted());
        drop(pointer);
        assert_eq!(interop.memory().stats().foreign_releases, 0);
    }

    #[test]
    fn test_cache_disabled_creates_distinct_wrappers() {
        let options = BridgeOptions {
            cache_pointers: false,
            ..Default::default()
        };
        let interop = Interop::with_options(options, standard_registry(), Box::new(SystemAllocator)).unwrap();
        let owner = interop.alloc(8).unwrap();
        let other = unsafe { interop.pointer_for_address(owner.address()) };
        assert!(!Rc::ptr_eq(&owner, &other));
        assert!(!other.is_adopted());
    }

    #[test]
    fn test_free_then_drop_releases_once() {
        let interop = Interop::new();
        let pointer = interop.alloc(8).unwrap();
        assert!(unsafe { interop.free(&pointer) });
        assert!(!unsafe { interop.free(&pointer) });
        drop(pointer);
        let stats = interop.memory().stats();
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn test_adopt_transfers_ownership() {
        let interop = Interop::new();
        let raw = SystemAllocator.allocate_zeroed(16).unwrap();
        let pointer = unsafe { interop.pointer_for_address(raw) };
        unsafe { interop.adopt(&pointer) };
        assert!(pointer.is_adopted());
        drop(pointer);
        assert_eq!(interop.memory().stats().foreign_releases, 1);
    }

    #[test]
    fn test_offset_pointer() {
        let interop = Interop::new();
        let base = interop.alloc(16).unwrap();
        let field = unsafe { interop.offset_pointer(&base, 8) }.unwrap();
        assert_eq!(field.as_usize(), base.as_usize() + 8);
        assert!(!field.is_adopted());
        assert!(Rc::ptr_eq(field.parent().unwrap(), &base));
        assert_eq!(field.known_extent(), Some(8));
        assert_eq!(interop.cached_pointer_count(), 1);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = BridgeOptions {
            limits: MemoryLimits::with_live_limit(0),
            ..Default::default()
        };
        let err = Interop::with_options(options, standard_registry(), Box::new(SystemAllocator)).unwrap_err();
        assert!(matches!(err, OptionsError::ValidationError(_)));
    }

    #[test]
    fn test_sizeof() {
        let interop = Interop::new();
        let int16 = interop.types().type_value("int16").unwrap();
        assert_eq!(interop.sizeof(&int16).unwrap(), 2);
        let pointer = interop.alloc(4).unwrap();
        assert_eq!(interop.sizeof(&Value::Pointer(pointer)).unwrap(), size_of::<usize>());
        assert_eq!(interop.sizeof(&Value::Number(1.0)), Err(BridgeError::InvalidType));
    }

    #[test]
    fn test_handleof() {
        let interop = Interop::new();
        let pointer = interop.alloc(4).unwrap();
        let handle = interop.handleof(&Value::Pointer(pointer.clone())).unwrap();
        assert!(Rc::ptr_eq(&handle, &pointer));
        assert!(interop.handleof(&Value::Bool(true)).is_none());
    }

    #[test]
    fn test_limits_from_options() {
        let options = BridgeOptions {
            limits: MemoryLimits::with_allocation_limit(4),
            ..Default::default()
        };
        let interop = Interop::with_options(options, standard_registry(), Box::new(SystemAllocator)).unwrap();
        let double = TypeDescriptor::primitive(Primitive::Float64);
        assert!(matches!(
            interop.alloc(double.size()),
            Err(BridgeError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_reference_constructor_shares_context() {
        let interop = Rc::new(Interop::new());
        let ctor = interop.reference_constructor();
        assert!(Rc::ptr_eq(ctor.interop(), &interop));
        let int32 = interop.types().type_value("int32").unwrap();
        let reference = ctor.construct(&[int32]).unwrap();
        assert_eq!(interop.sizeof(&Value::Reference(reference)).unwrap(), size_of::<usize>());
    }

    #[test]
    fn test_cache_prunes_dead_entries() {
        let interop = Interop::new();
        for _ in 0..(INITIAL_PRUNE_THRESHOLD * 4) {
            let _ = interop.alloc(8).unwrap();
        }
        assert_eq!(interop.cached_pointer_count(), 0);
        assert!(interop.pointers.borrow().len() < INITIAL_PRUNE_THRESHOLD * 4);
    }
}
