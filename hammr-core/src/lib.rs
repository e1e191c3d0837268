mod context;
mod element;
mod pipeline;
mod sample;
mod summary;
mod template;

pub mod elements;
pub mod runner;

pub use context::{LAST_SAMPLE_OK, ThreadAction, ThreadContext, Variables};
pub use element::{
    Assertion, AssertionFailure, BoxFuture, ElementError, Extractor, ExtractorPostProcessor,
    Listeners, PostProcessor, PreProcessor, SampleEvent, SampleListener, Sampler, ThreadListener,
    Timer,
};
pub use hammr_value::{ObjectMap, Value};
pub use pipeline::{IterationOutcome, Pipeline, PipelineBuilder, ThreadPipeline};
pub use runner::{Error, Result};
pub use sample::{SampleResult, SampleResultBuilder, SampleTimer};
pub use summary::{LabelSummary, Summariser, Summary};
pub use template::Template;
