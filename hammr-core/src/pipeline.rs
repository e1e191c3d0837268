//! Per-thread sample processing: pre-processors, timers, one sampler, post-processors,
//! assertions.
//!
//! A [`Pipeline`] is the immutable template shared by every thread of a group. It holds
//! element factories rather than elements, and each thread calls [`Pipeline::instantiate`]
//! once to get a [`ThreadPipeline`] it owns outright.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::context::{LAST_SAMPLE_OK, ThreadAction, ThreadContext};
use crate::element::{
    Assertion, ElementError, Extractor, ExtractorPostProcessor, PostProcessor, PreProcessor,
    Sampler, ThreadListener, Timer,
};
use crate::runner::OnSampleError;
use crate::sample::{SampleResult, SampleTimer};

type PreProcessorFactory = Arc<dyn Fn() -> Box<dyn PreProcessor> + Send + Sync>;
type SamplerFactory = Arc<dyn Fn() -> Box<dyn Sampler> + Send + Sync>;
type PostProcessorFactory = Arc<dyn Fn() -> Box<dyn PostProcessor> + Send + Sync>;
type TimerFactory = Arc<dyn Fn() -> Box<dyn Timer> + Send + Sync>;
type AssertionFactory = Arc<dyn Fn() -> Box<dyn Assertion> + Send + Sync>;

#[derive(Clone)]
pub struct Pipeline {
    pre: Vec<PreProcessorFactory>,
    timers: Vec<TimerFactory>,
    sampler: SamplerFactory,
    post: Vec<PostProcessorFactory>,
    assertions: Vec<AssertionFactory>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pre_processors", &self.pre.len())
            .field("timers", &self.timers.len())
            .field("post_processors", &self.post.len())
            .field("assertions", &self.assertions.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts a pipeline around `sampler`; every thread gets its own clone of it.
    pub fn builder<S>(sampler: S) -> PipelineBuilder
    where
        S: Sampler + Clone + Sync + 'static,
    {
        Self::builder_with(move || -> Box<dyn Sampler> { Box::new(sampler.clone()) })
    }

    /// Like [`Pipeline::builder`], for samplers that are built rather than cloned.
    pub fn builder_with<F>(factory: F) -> PipelineBuilder
    where
        F: Fn() -> Box<dyn Sampler> + Send + Sync + 'static,
    {
        PipelineBuilder {
            pre: Vec::new(),
            timers: Vec::new(),
            sampler: Arc::new(factory),
            post: Vec::new(),
            assertions: Vec::new(),
        }
    }

    /// Builds the private element instances of one thread.
    pub fn instantiate(&self) -> ThreadPipeline {
        ThreadPipeline {
            pre: self.pre.iter().map(|f| f()).collect(),
            timers: self.timers.iter().map(|f| f()).collect(),
            sampler: (self.sampler)(),
            post: self.post.iter().map(|f| f()).collect(),
            assertions: self.assertions.iter().map(|f| f()).collect(),
        }
    }
}

pub struct PipelineBuilder {
    pre: Vec<PreProcessorFactory>,
    timers: Vec<TimerFactory>,
    sampler: SamplerFactory,
    post: Vec<PostProcessorFactory>,
    assertions: Vec<AssertionFactory>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn pre_processor<P>(self, processor: P) -> Self
    where
        P: PreProcessor + Clone + Sync + 'static,
    {
        self.pre_processor_with(move || -> Box<dyn PreProcessor> { Box::new(processor.clone()) })
    }

    #[must_use]
    pub fn pre_processor_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PreProcessor> + Send + Sync + 'static,
    {
        self.pre.push(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn timer<T>(self, timer: T) -> Self
    where
        T: Timer + Clone + Sync + 'static,
    {
        self.timer_with(move || -> Box<dyn Timer> { Box::new(timer.clone()) })
    }

    #[must_use]
    pub fn timer_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Timer> + Send + Sync + 'static,
    {
        self.timers.push(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn post_processor<P>(self, processor: P) -> Self
    where
        P: PostProcessor + Clone + Sync + 'static,
    {
        self.post_processor_with(move || -> Box<dyn PostProcessor> {
            Box::new(processor.clone())
        })
    }

    #[must_use]
    pub fn post_processor_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PostProcessor> + Send + Sync + 'static,
    {
        self.post.push(Arc::new(factory));
        self
    }

    /// Appends an extractor to the post-processor stage.
    #[must_use]
    pub fn extractor<E>(self, extractor: E) -> Self
    where
        E: Extractor + Clone + Sync + 'static,
    {
        self.post_processor(ExtractorPostProcessor::new(extractor))
    }

    #[must_use]
    pub fn assertion<A>(self, assertion: A) -> Self
    where
        A: Assertion + Clone + Sync + 'static,
    {
        self.assertion_with(move || -> Box<dyn Assertion> { Box::new(assertion.clone()) })
    }

    #[must_use]
    pub fn assertion_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Assertion> + Send + Sync + 'static,
    {
        self.assertions.push(Arc::new(factory));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            pre: self.pre,
            timers: self.timers,
            sampler: self.sampler,
            post: self.post,
            assertions: self.assertions,
        }
    }
}

/// What one iteration produced.
#[derive(Debug, Default)]
pub struct IterationOutcome {
    /// `None` when the iteration was abandoned before the sampler ran.
    ///
    /// Assertion failures are already folded into the result's success flag.
    pub result: Option<SampleResult>,
    pub processor_errors: u64,
    /// Set when an element failed in a way that must end the thread.
    pub fatal: Option<ElementError>,
    /// A timer or the sampler was abandoned because of a stop-now request.
    pub interrupted: bool,
}

/// Element instances owned by a single thread.
pub struct ThreadPipeline {
    pre: Vec<Box<dyn PreProcessor>>,
    timers: Vec<Box<dyn Timer>>,
    sampler: Box<dyn Sampler>,
    post: Vec<Box<dyn PostProcessor>>,
    assertions: Vec<Box<dyn Assertion>>,
}

impl fmt::Debug for ThreadPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPipeline")
            .field("sampler", &self.sampler.label())
            .finish_non_exhaustive()
    }
}

impl ThreadPipeline {
    /// Calls every element's start hook. All hooks run even if one fails; the first fatal
    /// error is returned so the thread can end before its first iteration.
    pub fn thread_started(&mut self, ctx: &mut ThreadContext) -> Result<(), ElementError> {
        let thread = ctx.thread_name_arc();
        let mut fatal = None;
        for listener in self.listeners() {
            match listener.thread_started(ctx) {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    error!(thread = %thread, error = %err, "thread start hook failed");
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    warn!(thread = %thread, error = %err, "thread start hook failed");
                }
            }
        }
        fatal.map_or(Ok(()), Err)
    }

    /// Calls every element's finish hook. Failures are logged and otherwise ignored.
    pub fn thread_finished(&mut self, ctx: &ThreadContext) {
        for listener in self.listeners() {
            if let Err(err) = listener.thread_finished(ctx) {
                error!(thread = ctx.thread_name(), error = %err, "thread finish hook failed");
            }
        }
    }

    /// Runs every stage once, in order: pre-processors, timers, the sampler,
    /// post-processors, assertions.
    ///
    /// A fatal sampler error still lets post-processors and assertions see the failed
    /// result; the thread ends once the iteration is over.
    pub async fn run_iteration(
        &mut self,
        ctx: &mut ThreadContext,
        on_error: OnSampleError,
    ) -> IterationOutcome {
        let mut outcome = IterationOutcome::default();

        for p in &mut self.pre {
            if let Err(err) = p.process(ctx)
                && record_failure(&mut outcome, "pre-processor", p.name(), ctx, err)
            {
                return outcome;
            }
        }
        if ctx.pending_action() == Some(ThreadAction::StartNextLoop) {
            return outcome;
        }

        let stop = ctx.stop_signal().clone();
        let mut delay = Duration::ZERO;
        for t in &mut self.timers {
            delay = delay.saturating_add(t.delay(ctx));
        }
        if !delay.is_zero() {
            tokio::select! {
                biased;
                () = stop.stopped_now() => {
                    outcome.interrupted = true;
                    return outcome;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let label = self.sampler.label().to_string();
        let timer = SampleTimer::start();
        let sampled = {
            let ctx: &ThreadContext = ctx;
            tokio::select! {
                biased;
                () = stop.stopped_now() => None,
                res = self.sampler.sample(ctx) => Some(res),
            }
        };

        let mut sampler_fatal = None;
        let mut result = match sampled {
            Some(Ok(result)) => result,
            Some(Err(err)) => {
                warn!(thread = ctx.thread_name(), sampler = %label, error = %err, "sampler failed");
                let result = SampleResult::failure(label, timer, err.to_string());
                if err.is_fatal() {
                    sampler_fatal = Some(err);
                }
                result
            }
            None => {
                outcome.interrupted = true;
                SampleResult::failure(label, timer, "interrupted")
            }
        };

        let skip_post = outcome.interrupted
            || (!result.is_success() && on_error == OnSampleError::StartNextLoop);
        if !skip_post {
            for p in &mut self.post {
                if let Err(err) = p.process(&result, ctx)
                    && record_failure(&mut outcome, "post-processor", p.name(), ctx, err)
                {
                    break;
                }
            }
        }
        if !outcome.interrupted {
            for a in &mut self.assertions {
                if let Err(failure) = a.check(&result, ctx) {
                    debug!(
                        thread = ctx.thread_name(),
                        assertion = a.name(),
                        reason = %failure,
                        "assertion failed"
                    );
                    result.fail_assertion(a.name(), &failure.0);
                }
            }
        }

        ctx.put(
            LAST_SAMPLE_OK,
            if result.is_success() { "true" } else { "false" },
        );

        if let Some(err) = sampler_fatal {
            outcome.fatal = Some(err);
        }
        outcome.result = Some(result);
        outcome
    }

    fn listeners(&mut self) -> impl Iterator<Item = &mut dyn ThreadListener> {
        let pre = self.pre.iter_mut().filter_map(|p| p.as_thread_listener());
        let timers = self.timers.iter_mut().filter_map(|t| t.as_thread_listener());
        let sampler = self.sampler.as_thread_listener();
        let post = self.post.iter_mut().filter_map(|p| p.as_thread_listener());
        let assertions = self
            .assertions
            .iter_mut()
            .filter_map(|a| a.as_thread_listener());
        pre.chain(timers).chain(sampler).chain(post).chain(assertions)
    }
}

/// Records a processor failure; returns true when the stage must stop.
fn record_failure(
    outcome: &mut IterationOutcome,
    stage: &str,
    element: &str,
    ctx: &ThreadContext,
    err: ElementError,
) -> bool {
    outcome.processor_errors += 1;
    if err.is_fatal() {
        error!(thread = ctx.thread_name(), stage, element, error = %err, "element failed");
        outcome.fatal = Some(err);
        true
    } else {
        warn!(thread = ctx.thread_name(), stage, element, error = %err, "element failed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Variables;
    use crate::element::BoxFuture;
    use crate::elements::{ConstantTimer, ResponseAssertion, ResponseField};
    use crate::runner::StopSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Fixed {
        ok: bool,
    }

    impl Sampler for Fixed {
        fn label(&self) -> &str {
            "fixed"
        }

        fn sample<'a>(
            &'a mut self,
            _ctx: &'a ThreadContext,
        ) -> BoxFuture<'a, Result<SampleResult, ElementError>> {
            let ok = self.ok;
            Box::pin(async move {
                if ok {
                    Ok(SampleResult::builder("fixed").finish(SampleTimer::start()))
                } else {
                    Err(ElementError::failed("boom"))
                }
            })
        }
    }

    #[derive(Clone)]
    struct Exhausted;

    impl Sampler for Exhausted {
        fn label(&self) -> &str {
            "exhausted"
        }

        fn sample<'a>(
            &'a mut self,
            _ctx: &'a ThreadContext,
        ) -> BoxFuture<'a, Result<SampleResult, ElementError>> {
            Box::pin(async { Err(ElementError::fatal("connection pool exhausted")) })
        }
    }

    #[derive(Clone)]
    struct Stuck;

    impl Sampler for Stuck {
        fn label(&self) -> &str {
            "stuck"
        }

        fn sample<'a>(
            &'a mut self,
            _ctx: &'a ThreadContext,
        ) -> BoxFuture<'a, Result<SampleResult, ElementError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ElementError::failed("unreachable"))
            })
        }
    }

    #[derive(Clone)]
    struct Mark {
        name: &'static str,
        fail: Option<ElementError>,
        calls: Arc<AtomicUsize>,
    }

    impl PreProcessor for Mark {
        fn name(&self) -> &str {
            self.name
        }

        fn process(&mut self, ctx: &mut ThreadContext) -> Result<(), ElementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.put(self.name, "pre");
            self.fail.clone().map_or(Ok(()), Err)
        }
    }

    impl PostProcessor for Mark {
        fn name(&self) -> &str {
            self.name
        }

        fn process(
            &mut self,
            result: &SampleResult,
            ctx: &mut ThreadContext,
        ) -> Result<(), ElementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.put(self.name, result.label());
            self.fail.clone().map_or(Ok(()), Err)
        }
    }

    fn mark(name: &'static str, fail: Option<ElementError>) -> (Mark, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Mark {
                name,
                fail,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn ctx() -> ThreadContext {
        ThreadContext::new(
            Arc::from("g"),
            1,
            0,
            Arc::new(Variables::new()),
            StopSignal::new(),
        )
    }

    #[tokio::test]
    async fn stages_run_in_order_and_share_variables() {
        let (pre, _) = mark("pre", None);
        let (post, _) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .pre_processor(pre)
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;

        assert!(outcome.result.as_ref().is_some_and(SampleResult::is_success));
        assert_eq!(ctx.get_str("pre"), Some("pre"));
        assert_eq!(ctx.get_str("post"), Some("fixed"));
        assert_eq!(ctx.get_str(LAST_SAMPLE_OK), Some("true"));
    }

    #[tokio::test]
    async fn sampler_error_becomes_failed_result_and_post_processors_still_run() {
        let (post, calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: false })
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;

        let result = outcome
            .result
            .unwrap_or_else(|| panic!("expected a result"));
        assert!(!result.is_success());
        assert_eq!(result.label(), "fixed");
        assert_eq!(result.response_message(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.get_str(LAST_SAMPLE_OK), Some("false"));
    }

    #[tokio::test]
    async fn start_next_loop_policy_skips_post_processors_on_failure() {
        let (post, calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: false })
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline
            .run_iteration(&mut ctx, OnSampleError::StartNextLoop)
            .await;
        assert!(outcome.result.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_fatal_processor_error_does_not_stop_siblings() {
        let (first, _) = mark("first", Some(ElementError::failed("nope")));
        let (second, second_calls) = mark("second", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .post_processor(first)
            .post_processor(second)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;
        assert_eq!(outcome.processor_errors, 1);
        assert!(outcome.fatal.is_none());
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_pre_processor_error_skips_the_sampler() {
        let (pre, _) = mark("pre", Some(ElementError::fatal("out of data")));
        let (post, post_calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .pre_processor(pre)
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;
        assert!(outcome.result.is_none());
        assert!(outcome.fatal.as_ref().is_some_and(ElementError::is_fatal));
        assert_eq!(post_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_now_interrupts_the_sampler() {
        let (post, post_calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Stuck)
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let stop = ctx.stop_signal().clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.stop_now();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_iteration(&mut ctx, OnSampleError::Continue),
        )
        .await
        .unwrap_or_else(|_| panic!("sampler was not interrupted"));
        stopper.await.unwrap_or_else(|e| panic!("stopper task failed: {e}"));

        assert!(outcome.interrupted);
        let result = outcome
            .result
            .unwrap_or_else(|| panic!("expected a result"));
        assert!(!result.is_success());
        assert_eq!(result.response_message(), "interrupted");
        assert_eq!(post_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_sampler_error_still_runs_post_processors_and_assertions() {
        let (post, post_calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Exhausted)
            .post_processor(post)
            .assertion(ResponseAssertion::contains(ResponseField::Message, "pool"))
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;

        assert_eq!(post_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.get_str("post"), Some("exhausted"));
        assert_eq!(
            outcome.fatal,
            Some(ElementError::fatal("connection pool exhausted"))
        );
        let result = outcome
            .result
            .unwrap_or_else(|| panic!("expected a result"));
        assert!(!result.is_success());
        assert!(result.assertion_failures().is_empty());
        assert_eq!(ctx.get_str(LAST_SAMPLE_OK), Some("false"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_delays_add_up_before_the_sampler() {
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .timer(ConstantTimer::new(Duration::from_millis(300)))
            .timer(ConstantTimer::new(Duration::from_millis(200)))
            .build()
            .instantiate();

        let mut ctx = ctx();
        let before = tokio::time::Instant::now();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;

        assert!(before.elapsed() >= Duration::from_millis(500));
        let result = outcome
            .result
            .unwrap_or_else(|| panic!("expected a result"));
        assert!(result.is_success());
        assert!(result.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_now_during_a_timer_abandons_the_iteration() {
        let (post, post_calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .timer(ConstantTimer::new(Duration::from_secs(3600)))
            .post_processor(post)
            .build()
            .instantiate();

        let mut ctx = ctx();
        let stop = ctx.stop_signal().clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.stop_now();
        });

        let before = tokio::time::Instant::now();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;
        stopper.await.unwrap_or_else(|e| panic!("stopper task failed: {e}"));

        assert!(before.elapsed() < Duration::from_secs(3600));
        assert!(outcome.interrupted);
        assert!(outcome.result.is_none());
        assert_eq!(post_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_assertion_fails_the_result_after_post_processors() {
        let (post, post_calls) = mark("post", None);
        let mut pipeline = Pipeline::builder(Fixed { ok: true })
            .post_processor(post)
            .assertion(ResponseAssertion::equals(ResponseField::Code, "500"))
            .assertion(ResponseAssertion::equals(ResponseField::Label, "fixed"))
            .build()
            .instantiate();

        let mut ctx = ctx();
        let outcome = pipeline.run_iteration(&mut ctx, OnSampleError::Continue).await;

        assert_eq!(post_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.processor_errors, 0);
        assert!(outcome.fatal.is_none());
        let result = outcome
            .result
            .unwrap_or_else(|| panic!("expected a result"));
        assert!(!result.is_success());
        assert_eq!(
            result.assertion_failures(),
            ["Response Assertion: expected code to equal `500`, got ``"]
        );
        assert_eq!(ctx.get_str(LAST_SAMPLE_OK), Some("false"));
    }

    #[test]
    fn every_instance_gets_its_own_elements() {
        let pipeline = Pipeline::builder(Fixed { ok: true }).build();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let pipeline = Pipeline {
            pre: vec![Arc::new(move || -> Box<dyn PreProcessor> {
                counter.fetch_add(1, Ordering::SeqCst);
                let (m, _) = mark("m", None);
                Box::new(m)
            })],
            ..pipeline
        };

        let _a = pipeline.instantiate();
        let _b = pipeline.instantiate();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
