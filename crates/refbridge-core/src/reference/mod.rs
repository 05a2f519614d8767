//! References: typed cells over native memory and their constructor

mod constructor;
mod instance;

pub use constructor::{Initializer, ReferenceConstructor, REFERENCE_CONSTRUCTOR_LENGTH};
pub use instance::{ReferenceInstance, ReferenceState};
