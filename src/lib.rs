//! # rvplan - Test Plan Lowering for RISC-V
//!
//! Turns abstract, hardware-agnostic test plans into concrete,
//! register-allocated RISC-V instruction sequences for randomized
//! architectural-compliance tests.
//!
//! A plan is a list of [`Step`]s: arithmetic, loads and stores, CSR access,
//! assertions, function calls, page reservations and page-table-entry
//! access. Steps name each other by id; nothing in a plan mentions a
//! register, an encoding or an address.
//!
//! ## Quick Start
//!
//! ```rust
//! use rvplan::{transform_tests, LoweringOptions, Step, StepKind, TemplateCatalog, TestEnv, TestScenario, Xlen};
//!
//! # fn main() -> rvplan::Result<()> {
//! let scenario = TestScenario::new(
//!     "add_then_store",
//!     vec![
//!         Step::new("sum", StepKind::Arithmetic { op: Some("add".into()) }),
//!         Step::new("st", StepKind::Store { offset: 16, access_size: Some(8), op: None })
//!             .with_inputs(["sum"]),
//!     ],
//! );
//!
//! let catalog = TemplateCatalog::builtin(Xlen::Rv64)?;
//! let program = transform_tests(&[scenario], TestEnv::default(), &catalog, LoweringOptions::with_seed(7))?;
//!
//! let test = program.test("add_then_store").unwrap();
//! assert!(test.instructions.iter().all(|i| i.is_fully_allocated()));
//! println!("{}", test);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`plan`]** - steps, scenarios and the resolved [`TestEnv`]
//! - **[`action`]** - the Action IR and the step → action registry
//! - **[`isa`]** - registers, operands, [`Instruction`] and the [`InstructionCatalog`]
//! - **[`transform`]** - expander, elaborator, canonicalizer, legalizer,
//!   linear-scan allocator and the batch [`Transformer`]
//! - **[`context`]** / **[`memory`]** - shared per-batch state
//!
//! ## Determinism
//!
//! Every random choice (operand values, opcode selection, register choice)
//! draws from one RNG seeded by [`LoweringOptions::seed`]. The same seed,
//! catalog and scenarios always lower to the same instructions.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. [`Error::classify`] separates
//! malformed input ([`ErrorKind::Content`]) from broken pipeline invariants
//! ([`ErrorKind::Internal`]).
//!
//! ## License
//!
//! Licensed under the [MIT License](https://opensource.org/licenses/MIT).

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod isa;
pub mod memory;
pub mod plan;
pub mod random;
pub mod transform;

pub use action::{Action, ActionKind, ActionRegistry, DiscreteTest};
pub use config::LoweringOptions;
pub use context::LoweringContext;
pub use error::{Error, ErrorKind, Result};
pub use isa::{Instruction, InstructionCatalog, InstructionFilter, Register, TemplateCatalog};
pub use memory::{CodePage, DataPage, MemoryRegistry};
pub use plan::{MemorySpec, PagingMode, PrivilegeMode, Step, StepKind, TestEnv, TestScenario, Xlen};
pub use transform::{transform_tests, LoweredProgram, Routine, Transformer};
