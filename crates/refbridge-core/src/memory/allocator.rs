//! Zeroed allocation for native cells
//!
//! The bridge allocates through an [`Allocator`]. The default
//! [`SystemAllocator`] uses the C heap (`calloc`/`free`), so an address
//! obtained from native `malloc` can be adopted and released the same way.

use crate::error::{BridgeError, BridgeResult};
use crate::options::MemoryLimits;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

/// Source of zero-initialized native memory
pub trait Allocator {
    /// Allocate `size` zeroed bytes. Returns `None` on exhaustion.
    fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release memory previously obtained from this allocator
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_zeroed` on a compatible allocator and
    /// must not be released twice.
    unsafe fn release(&self, ptr: NonNull<u8>);
}

/// C heap allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate_zeroed(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe { libc::calloc(size, 1) };
        NonNull::new(ptr as *mut u8)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }
}

/// Allocation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Successful allocations
    pub allocations: usize,

    /// Releases of bridge-allocated memory
    pub releases: usize,

    /// Releases of adopted memory the bridge did not allocate
    pub foreign_releases: usize,

    /// Bytes currently owned
    pub live_bytes: usize,

    /// High-water mark of `live_bytes`
    pub peak_live_bytes: usize,
}

/// Bookkeeping front for an [`Allocator`]
///
/// Enforces [`MemoryLimits`] and tracks which addresses the bridge itself
/// allocated, so statistics stay exact across adopt/free cycles.
pub struct MemoryManager {
    allocator: Box<dyn Allocator>,
    limits: MemoryLimits,
    /// Bridge-allocated address -> size
    live: RefCell<FxHashMap<usize, usize>>,
    stats: Cell<MemoryStats>,
}

impl MemoryManager {
    /// Create a manager over an allocator
    pub fn new(allocator: Box<dyn Allocator>, limits: MemoryLimits) -> Self {
        Self {
            allocator,
            limits,
            live: RefCell::new(FxHashMap::default()),
            stats: Cell::new(MemoryStats::default()),
        }
    }

    /// Get the configured limits
    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    /// Get a snapshot of the statistics
    pub fn stats(&self) -> MemoryStats {
        self.stats.get()
    }

    /// Check whether `addr` is currently owned by a bridge allocation
    pub fn is_live(&self, addr: usize) -> bool {
        self.live.borrow().contains_key(&addr)
    }

    /// Size of a live bridge allocation
    pub fn allocation_size(&self, addr: usize) -> Option<usize> {
        self.live.borrow().get(&addr).copied()
    }

    /// Allocate `size` zeroed bytes
    ///
    /// Never returns a null address: exhaustion and limit violations are
    /// reported as errors.
    pub fn allocate_zeroed(&self, size: usize) -> BridgeResult<NonNull<u8>> {
        if size == 0 {
            return Err(BridgeError::InvalidDescriptor(
                "cannot allocate a zero-sized cell".to_string(),
            ));
        }

        if let Some(limit) = self.limits.max_allocation_bytes {
            if size > limit {
                return Err(BridgeError::LimitExceeded {
                    requested: size,
                    limit,
                });
            }
        }

        let mut stats = self.stats.get();
        if let Some(limit) = self.limits.max_live_bytes {
            if stats.live_bytes.saturating_add(size) > limit {
                return Err(BridgeError::LimitExceeded {
                    requested: size,
                    limit,
                });
            }
        }

        let ptr = self
            .allocator
            .allocate_zeroed(size)
            .ok_or(BridgeError::AllocationFailed { size })?;

        self.live.borrow_mut().insert(ptr.as_ptr() as usize, size);
        stats.allocations += 1;
        stats.live_bytes += size;
        stats.peak_live_bytes = stats.peak_live_bytes.max(stats.live_bytes);
        self.stats.set(stats);

        tracing::trace!(address = ptr.as_ptr() as usize, size, "allocated native cell");
        Ok(ptr)
    }

    /// Release an owned address
    ///
    /// # Safety
    ///
    /// `ptr` must be owned by the caller and not released before. Addresses
    /// not allocated by this manager must come from a compatible allocator.
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let mut stats = self.stats.get();

        match self.live.borrow_mut().remove(&addr) {
            Some(size) => {
                stats.releases += 1;
                stats.live_bytes -= size;
                tracing::trace!(address = addr, size, "released native cell");
            }
            None => {
                stats.foreign_releases += 1;
                tracing::warn!(address = addr, "releasing adopted memory not allocated by the bridge");
            }
        }
        self.stats.set(stats);

        self.allocator.release(ptr);
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(Box::new(SystemAllocator), MemoryLimits::default())
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("limits", &self.limits)
            .field("stats", &self.stats.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExhaustedAllocator;

    impl Allocator for ExhaustedAllocator {
        fn allocate_zeroed(&self, _size: usize) -> Option<NonNull<u8>> {
            None
        }

        unsafe fn release(&self, _ptr: NonNull<u8>) {}
    }

    #[test]
    fn test_allocate_is_zeroed() {
        let manager = MemoryManager::default();
        let ptr = manager.allocate_zeroed(32).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { manager.release(ptr) };
    }

    #[test]
    fn test_stats_track_live_bytes() {
        let manager = MemoryManager::default();
        let a = manager.allocate_zeroed(8).unwrap();
        let b = manager.allocate_zeroed(16).unwrap();
        assert_eq!(manager.stats().live_bytes, 24);
        assert_eq!(manager.allocation_size(a.as_ptr() as usize), Some(8));

        unsafe { manager.release(a) };
        let stats = manager.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.live_bytes, 16);
        assert_eq!(stats.peak_live_bytes, 24);
        assert!(!manager.is_live(a.as_ptr() as usize));
        assert!(manager.is_live(b.as_ptr() as usize));

        unsafe { manager.release(b) };
        assert_eq!(manager.stats().live_bytes, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let manager = MemoryManager::default();
        assert!(matches!(
            manager.allocate_zeroed(0),
            Err(BridgeError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let manager = MemoryManager::new(Box::new(ExhaustedAllocator), MemoryLimits::default());
        assert_eq!(
            manager.allocate_zeroed(4),
            Err(BridgeError::AllocationFailed { size: 4 })
        );
        assert_eq!(manager.stats().allocations, 0);
    }

    #[test]
    fn test_allocation_limit() {
        let manager = MemoryManager::new(
            Box::new(SystemAllocator),
            MemoryLimits::with_allocation_limit(8),
        );
        assert_eq!(
            manager.allocate_zeroed(9),
            Err(BridgeError::LimitExceeded {
                requested: 9,
                limit: 8
            })
        );
        let ptr = manager.allocate_zeroed(8).unwrap();
        unsafe { manager.release(ptr) };
    }

    #[test]
    fn test_live_limit() {
        let manager = MemoryManager::new(
            Box::new(SystemAllocator),
            MemoryLimits::with_live_limit(16),
        );
        let a = manager.allocate_zeroed(12).unwrap();
        assert!(matches!(
            manager.allocate_zeroed(8),
            Err(BridgeError::LimitExceeded { .. })
        ));
        unsafe { manager.release(a) };
        let b = manager.allocate_zeroed(8).unwrap();
        unsafe { manager.release(b) };
    }

    #[test]
    fn test_foreign_release_counted() {
        let manager = MemoryManager::default();
        let foreign = SystemAllocator.allocate_zeroed(4).unwrap();
        unsafe { manager.release(foreign) };
        let stats = manager.stats();
        assert_eq!(stats.foreign_releases, 1);
        assert_eq!(stats.releases, 0);
    }
}
