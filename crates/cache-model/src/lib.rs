//! Shared data-model types for the IMP-cache placement pipeline.
//!
//! Selectors, classes, methods and locators live here so that the graph
//! builder, solver, packer and emitter crates can all address the same
//! arenas without owning them.

pub mod class;
pub mod diagnostics;
pub mod selector;

pub use class::{
    Class, ClassFlags, ClassId, ClassKey, ClassLocator, Method, MethodProvenance,
};
pub use diagnostics::{Diagnostics, OptimizerError, Warning};
pub use selector::{Selector, SelectorId, SelectorTable, MAGIC_SELECTOR_NAME};

/// High bit below which Phase 1 shift/mask windows must live; bits above this
/// are reserved for the Phase 2 bucket index (`17 = 10 (bucket bits up to 16MiB/128) + ...`
/// kept as a single named constant rather than sprinkled as a magic number).
pub const MAX_SHIFT_PLUS_BITS: u32 = 17;

/// A class cache beyond this many slots cannot be represented in the 11-bit
/// `cache_mask` output field.
pub const MAX_CACHE_MASK: u32 = 0x7FF;

/// Bucket stride used by the address-space packer (Phase 2), in bytes.
pub const BUCKET_SIZE: u32 = 128;

/// Selectors larger than this may overflow into the following bucket.
pub const OVERFLOW_THRESHOLD: u32 = 64;

/// Hard cap on total selector bytes before the solver refuses to run.
pub const MAX_SELECTOR_SPACE_BYTES: u64 = 1 << 24;
