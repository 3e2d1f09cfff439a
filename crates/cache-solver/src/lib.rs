//! Constrained backtracking placement solver (ss4.3-ss4.6): chooses a
//! `(shift, mask)` per class and a global byte address per selector.

mod constraint;
mod drop;
mod hole;
mod phase1;
mod phase2;

pub use constraint::{Constraint, ConstraintSet};
pub use drop::cascade_flattening_drop;
pub use hole::{extract_holes, Hole, HoleMap};
pub use phase1::solve as solve_placement;
pub use phase2::pack as pack_address_space;
