//! Test plan inputs: steps, scenarios and the resolved environment

pub mod env;
pub mod step;

pub use env::{PagingMode, PrivilegeMode, TestEnv, Xlen};
pub use step::{
    ExceptionCause, MemorySpec, PageFlags, PageSize, Step, StepInput, StepKind, StepTag,
    TestScenario,
};
