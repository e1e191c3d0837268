use std::time::Duration;

use crate::context::ThreadContext;
use crate::element::{BoxFuture, ElementError, Sampler};
use crate::sample::{SampleResult, SampleTimer};
use crate::template::Template;

/// Produces a configurable result without doing any I/O.
///
/// Label and response body are templates rendered per sample. A non-zero response time is
/// spent sleeping, so a stop-now request interrupts it like real network I/O.
#[derive(Debug, Clone)]
pub struct DummySampler {
    label: Template,
    response_data: Template,
    response_code: String,
    response_message: String,
    success: bool,
    response_time: Duration,
}

impl DummySampler {
    pub fn new(label: impl Into<Template>) -> Self {
        Self {
            label: label.into(),
            response_data: Template::parse(""),
            response_code: "200".to_string(),
            response_message: "OK".to_string(),
            success: true,
            response_time: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_response_data(mut self, data: impl Into<Template>) -> Self {
        self.response_data = data.into();
        self
    }

    #[must_use]
    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = code.into();
        self
    }

    #[must_use]
    pub fn with_response_message(mut self, message: impl Into<String>) -> Self {
        self.response_message = message.into();
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    #[must_use]
    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }
}

impl Sampler for DummySampler {
    fn label(&self) -> &str {
        self.label.as_str()
    }

    fn sample<'a>(
        &'a mut self,
        ctx: &'a ThreadContext,
    ) -> BoxFuture<'a, Result<SampleResult, ElementError>> {
        Box::pin(async move {
            let timer = SampleTimer::start();
            let label = self.label.render(ctx);
            let body = self.response_data.render(ctx);

            if !self.response_time.is_zero() {
                tokio::time::sleep(self.response_time).await;
            }

            Ok(SampleResult::builder(label)
                .success(self.success)
                .response_code(self.response_code.as_str())
                .response_message(self.response_message.as_str())
                .response_data(body)
                .finish(timer))
        })
    }
}
