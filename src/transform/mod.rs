//! # Lowering passes
//!
//! ```text
//! [DiscreteTest] ─canonicalize─▶ tests + functions
//!                     │
//!        per routine: expand ─▶ elaborate ─▶ legalize ─▶ allocate
//!                     │
//!                     ▼
//!               LoweredProgram
//! ```
//!
//! Each pass is a free function over `Vec<Action>` or `Vec<Instruction>`
//! taking the shared [`LoweringContext`](crate::context::LoweringContext).
//! [`Transformer`] runs them in order for a whole batch and closes each test
//! with the [`harness`] pass jump.

pub mod allocator;
pub mod canonicalizer;
pub mod elaborator;
pub mod expander;
pub mod harness;
pub mod legalizer;
pub mod transformer;

pub use canonicalizer::{canonicalize, CanonicalBatch};
pub use elaborator::elaborate;
pub use expander::expand;
pub use legalizer::legalize;
pub use transformer::{transform_tests, LoweredProgram, Routine, Transformer};
