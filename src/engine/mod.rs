pub mod step;
pub mod types;

pub use step::{EngineContext, Navigation, StepEngine};
pub use types::{
    EngineOptions, EngineState, RunResult, RunStatus, StepError, StepOutcome, StepResult,
    TestCase, TestStep,
};
