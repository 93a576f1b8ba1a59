/// The propagator composing dynamics into a single system of equations.
pub mod propagator;

/// Event-bounded propagation phases.
pub mod segment;

/// Chained segments with repetition and global bounds.
pub mod sequence;

pub use propagator::Propagator;
pub use segment::{Segment, SegmentKind, SegmentSolution};
pub use sequence::{Sequence, SequenceSolution};
