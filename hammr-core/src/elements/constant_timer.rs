use std::time::Duration;

use crate::context::ThreadContext;
use crate::element::Timer;

/// Waits a fixed time before every sample.
#[derive(Debug, Clone)]
pub struct ConstantTimer {
    delay: Duration,
}

impl ConstantTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Timer for ConstantTimer {
    fn name(&self) -> &str {
        "Constant Timer"
    }

    fn delay(&mut self, _ctx: &ThreadContext) -> Duration {
        self.delay
    }
}
