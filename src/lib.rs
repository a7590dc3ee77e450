//! Process bootstrap for the maestro service: command line, configuration,
//! tracing and adapter wiring.

pub mod bootstrap;
pub mod cli;

pub use cli::Cli;
