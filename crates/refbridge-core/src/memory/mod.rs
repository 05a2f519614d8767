//! Native memory: allocation, ownership and pointer wrappers
//!
//! # Ownership
//!
//! Every address the bridge hands to script code is wrapped in a
//! [`PointerInstance`]. The wrapper carries an [`Ownership`] tag:
//!
//! - `Owned`: the wrapper releases the address when it is finalized
//! - `Borrowed`: the address belongs to native code or to another owner
//!
//! Finalization is the wrapper's `Drop`, which runs once when the last
//! script-side holder goes away. There is no reference count on the raw
//! memory itself; at most one wrapper per address may be `Owned`.

mod allocator;
mod pointer;

pub use allocator::{Allocator, MemoryManager, MemoryStats, SystemAllocator};
pub use pointer::{Ownership, PointerInstance};
