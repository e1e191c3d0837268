use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;

/// Start point of a sample measurement.
///
/// Captures the wall clock (for reporting) and a monotonic instant (for elapsed time) at
/// the same moment, so a result's end timestamp can never precede its start.
#[derive(Debug, Clone, Copy)]
pub struct SampleTimer {
    started_at: SystemTime,
    started: Instant,
}

impl SampleTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome and timing of one sampler invocation.
///
/// Fields are private: once a sampler returns a result only the assertion stage can change
/// it, and only from passed to failed.
#[derive(Debug, Clone)]
pub struct SampleResult {
    label: Arc<str>,
    started_at: SystemTime,
    elapsed: Duration,
    success: bool,
    response_code: String,
    response_message: String,
    response_data: Bytes,
    children: Vec<SampleResult>,
    assertion_failures: Vec<String>,
}

impl SampleResult {
    pub fn builder(label: impl Into<Arc<str>>) -> SampleResultBuilder {
        SampleResultBuilder {
            label: label.into(),
            success: true,
            response_code: String::new(),
            response_message: String::new(),
            response_data: Bytes::new(),
            children: Vec::new(),
        }
    }

    /// A failed result carrying `message` as its response message.
    pub fn failure(
        label: impl Into<Arc<str>>,
        timer: SampleTimer,
        message: impl Into<String>,
    ) -> Self {
        Self::builder(label)
            .success(false)
            .response_message(message)
            .finish(timer)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn start_time(&self) -> SystemTime {
        self.started_at
    }

    pub fn end_time(&self) -> SystemTime {
        self.started_at + self.elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn response_code(&self) -> &str {
        &self.response_code
    }

    pub fn response_message(&self) -> &str {
        &self.response_message
    }

    pub fn response_data(&self) -> &Bytes {
        &self.response_data
    }

    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response_data)
    }

    pub fn children(&self) -> &[SampleResult] {
        &self.children
    }

    /// `"<assertion>: <message>"` for every assertion that rejected this result.
    pub fn assertion_failures(&self) -> &[String] {
        &self.assertion_failures
    }

    pub(crate) fn fail_assertion(&mut self, assertion: &str, message: &str) {
        self.success = false;
        self.assertion_failures.push(format!("{assertion}: {message}"));
    }

    /// Response bytes of this result and all of its children.
    pub fn bytes_received(&self) -> u64 {
        let own = self.response_data.len() as u64;
        self.children
            .iter()
            .fold(own, |acc, c| acc.saturating_add(c.bytes_received()))
    }
}

#[derive(Debug)]
pub struct SampleResultBuilder {
    label: Arc<str>,
    success: bool,
    response_code: String,
    response_message: String,
    response_data: Bytes,
    children: Vec<SampleResult>,
}

impl SampleResultBuilder {
    #[must_use]
    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    #[must_use]
    pub fn response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = code.into();
        self
    }

    #[must_use]
    pub fn response_message(mut self, message: impl Into<String>) -> Self {
        self.response_message = message.into();
        self
    }

    #[must_use]
    pub fn response_data(mut self, data: impl Into<Bytes>) -> Self {
        self.response_data = data.into();
        self
    }

    /// Adds a child result. A failed child fails the parent.
    #[must_use]
    pub fn child(mut self, child: SampleResult) -> Self {
        self.success &= child.success;
        self.children.push(child);
        self
    }

    /// Stops the measurement and freezes the result.
    pub fn finish(self, timer: SampleTimer) -> SampleResult {
        SampleResult {
            label: self.label,
            started_at: timer.started_at,
            elapsed: timer.elapsed(),
            success: self.success,
            response_code: self.response_code,
            response_message: self.response_message,
            response_data: self.response_data,
            children: self.children,
            assertion_failures: Vec::new(),
        }
    }
}
