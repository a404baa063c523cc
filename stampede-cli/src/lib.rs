//! Stampede command line surface: argument parsing, built-in scenarios and
//! report output

pub mod cli;
pub mod output;
pub mod scenarios;

pub use scenarios::{Scenario, ScenarioKind};
