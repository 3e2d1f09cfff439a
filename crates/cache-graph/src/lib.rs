//! Builds the normalized class/selector graph the placement solver consumes.
//!
//! Input is a pre-parsed dylib/class/category document (ss6); the real
//! binary-image parser that would produce it is out of scope (ss1).

pub mod builder;
pub mod input;

pub use builder::{build_graph, remove_uninteresting_classes, Graph, CXX_CONSTRUCT, CXX_DESTRUCT};
pub use input::{InputCategory, InputClass, InputClassRef, InputDylib};
