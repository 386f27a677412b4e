pub mod pipeline_event;

pub use pipeline_event::{EventEnvelope, PipelineEvent};
