// Moderation pipeline: scheduled fetch -> classify -> aggregate -> persist.
//
// `Pipeline` runs one tick at a time; `Scheduler` owns the timer that fires
// ticks. Both are explicit values the binary (and the web layer) hold by Arc.

pub mod aggregate;
pub mod run;
pub mod scheduler;

#[cfg(all(test, feature = "sqlite"))]
mod testing;

pub use aggregate::{aggregate, ClassifierNotes};
pub use run::{ItemOutcome, ItemReport, Phase, Pipeline, PipelineConfig, TickOutcome, TickReport};
pub use scheduler::Scheduler;
