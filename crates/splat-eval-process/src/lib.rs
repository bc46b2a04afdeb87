pub mod config;
pub mod device;
pub mod driver;
pub mod eval;
pub mod manifest;
pub mod paths;

pub use driver::{EvalOutcome, Experiment, run_evaluation};
