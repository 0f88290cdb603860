//! Benchmark execution: command construction, process launching and the
//! per-benchmark run/retry loop.

pub mod command;
pub mod process;
pub mod runner;
pub mod state;

pub use command::{ChildEnv, EngineFlags, Invocation, RunCommand};
pub use process::{ContainerLauncher, OutputSink, ProcessLauncher};
pub use runner::{BenchmarkOutcome, BenchmarkRunner, RunContext, RunRecord};
pub use state::{AttemptOutcome, RunLoop, RunState};
