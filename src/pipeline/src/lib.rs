pub mod build;
pub mod error;
pub mod push;
pub mod trigger;

pub use build::{BuildSpec, ImageArtifact, ImageBuilder};
pub use error::{PipelineError, Result};
pub use push::{PushOutcome, Pusher};
pub use trigger::{PipelineConfig, PipelineTrigger, PushEvent, RunOutcome, RunRecord};
