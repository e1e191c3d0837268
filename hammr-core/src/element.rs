//! Pipeline element contracts.
//!
//! A thread group's pipeline is a sequence of trait objects: pre-processors, timers,
//! exactly one sampler, post-processors (extractors are adapted into post-processors),
//! then assertions. Every thread works on its own copy of each element, so `&mut self`
//! state is thread-local.
//!
//! Any element can additionally expose the [`ThreadListener`] capability to be told when
//! its thread starts and finishes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hammr_value::Value;

use crate::context::ThreadContext;
use crate::sample::SampleResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure raised by a pipeline element.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    /// Recorded against the current iteration; the thread keeps running.
    #[error("{0}")]
    Failed(String),

    /// The thread cannot continue (e.g. a resource it depends on is exhausted).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ElementError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Thread start/finish notifications.
///
/// The runner calls `thread_started` once before the first iteration and
/// `thread_finished` exactly once when the thread ends, however it ends.
pub trait ThreadListener {
    fn thread_started(&mut self, _ctx: &mut ThreadContext) -> Result<(), ElementError> {
        Ok(())
    }

    fn thread_finished(&mut self, _ctx: &ThreadContext) -> Result<(), ElementError> {
        Ok(())
    }
}

pub trait PreProcessor: Send {
    fn name(&self) -> &str;

    fn process(&mut self, ctx: &mut ThreadContext) -> Result<(), ElementError>;

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

pub trait Sampler: Send {
    fn label(&self) -> &str;

    /// Produces one result. Variables are read-only while sampling.
    ///
    /// An `Err` is turned into a failed [`SampleResult`] by the pipeline, so post-processors
    /// still get a result to look at.
    fn sample<'a>(
        &'a mut self,
        ctx: &'a ThreadContext,
    ) -> BoxFuture<'a, Result<SampleResult, ElementError>>;

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

/// Delays the sampler. The delays of every timer in a pipeline add up.
pub trait Timer: Send {
    fn name(&self) -> &str;

    fn delay(&mut self, ctx: &ThreadContext) -> Duration;

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

pub trait PostProcessor: Send {
    fn name(&self) -> &str;

    fn process(
        &mut self,
        result: &SampleResult,
        ctx: &mut ThreadContext,
    ) -> Result<(), ElementError>;

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

/// Why an assertion rejected a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AssertionFailure(pub String);

/// Judges a finished sample. A failed assertion marks the result as failed; it is not a
/// processor error.
pub trait Assertion: Send {
    fn name(&self) -> &str;

    fn check(
        &mut self,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> Result<(), AssertionFailure>;

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

/// Derives one named variable from a sample result.
///
/// The extraction language is up to the implementation; the pipeline only stores what it
/// returns. `Ok(None)` and `Ok(Some(Value::Null))` both mean "no match" and store
/// [`Extractor::default_value`] when set.
pub trait Extractor: Send {
    fn variable(&self) -> &str;

    fn extract(&mut self, result: &SampleResult) -> Result<Option<Value>, ElementError>;

    fn default_value(&self) -> Option<Value> {
        None
    }

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        None
    }
}

/// Runs an [`Extractor`] as a post-processor.
#[derive(Debug, Clone)]
pub struct ExtractorPostProcessor<E> {
    extractor: E,
}

impl<E: Extractor> ExtractorPostProcessor<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

impl<E: Extractor> PostProcessor for ExtractorPostProcessor<E> {
    fn name(&self) -> &str {
        self.extractor.variable()
    }

    fn process(
        &mut self,
        result: &SampleResult,
        ctx: &mut ThreadContext,
    ) -> Result<(), ElementError> {
        // Reset to the default first so a failed extraction never leaves a stale value
        // from an earlier iteration behind.
        let default = self.extractor.default_value();
        let name = self.extractor.variable().to_string();
        match &default {
            Some(v) => {
                ctx.put(name.as_str(), v.clone());
            }
            None => {
                ctx.variables_mut().remove(&name);
            }
        }

        if let Some(v) = self.extractor.extract(result)?
            && !v.is_null()
        {
            ctx.put(name, v);
        }
        Ok(())
    }

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        self.extractor.as_thread_listener()
    }
}

/// One sample as seen by result listeners.
#[derive(Debug, Clone)]
pub struct SampleEvent {
    pub group: Arc<str>,
    pub thread_name: Arc<str>,
    pub thread_num: u64,
    pub iteration: u64,
    pub result: SampleResult,
}

/// Receives every sample after its iteration's processor chain has completed.
pub trait SampleListener: Send + Sync {
    fn sample_occurred(&self, event: &SampleEvent);
}

impl<F> SampleListener for F
where
    F: Fn(&SampleEvent) + Send + Sync,
{
    fn sample_occurred(&self, event: &SampleEvent) {
        (self)(event);
    }
}

pub type Listeners = Arc<[Arc<dyn SampleListener>]>;
