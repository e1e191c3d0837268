use std::sync::Arc;

use crate::context::ThreadContext;
use crate::element::{ElementError, PreProcessor, ThreadListener};

/// Per-thread counter stored in a variable before every sample.
///
/// Counts from `start` by `increment`; with an `end`, wraps back to `start` once the next
/// value would pass it. Restarts whenever its thread starts.
#[derive(Debug, Clone)]
pub struct Counter {
    variable: Arc<str>,
    start: i64,
    increment: i64,
    end: Option<i64>,
    next: i64,
}

impl Counter {
    pub fn new(variable: impl Into<Arc<str>>) -> Self {
        Self {
            variable: variable.into(),
            start: 1,
            increment: 1,
            end: None,
            next: 1,
        }
    }

    #[must_use]
    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self.next = start;
        self
    }

    #[must_use]
    pub fn with_increment(mut self, increment: i64) -> Self {
        self.increment = increment;
        self
    }

    #[must_use]
    pub fn with_end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    fn advance(&mut self) {
        let passed_end = |v: i64| match self.end {
            Some(end) if self.increment >= 0 => v > end,
            Some(end) => v < end,
            None => false,
        };
        self.next = match self.next.checked_add(self.increment) {
            Some(v) if !passed_end(v) => v,
            _ => self.start,
        };
    }
}

impl PreProcessor for Counter {
    fn name(&self) -> &str {
        &self.variable
    }

    fn process(&mut self, ctx: &mut ThreadContext) -> Result<(), ElementError> {
        ctx.put(self.variable.clone(), self.next);
        self.advance();
        Ok(())
    }

    fn as_thread_listener(&mut self) -> Option<&mut dyn ThreadListener> {
        Some(self)
    }
}

impl ThreadListener for Counter {
    fn thread_started(&mut self, _ctx: &mut ThreadContext) -> Result<(), ElementError> {
        self.next = self.start;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Variables;
    use crate::runner::StopSignal;
    use hammr_value::Value;

    fn values(counter: &mut Counter, n: usize) -> Vec<i64> {
        let mut ctx = ThreadContext::new(
            Arc::from("g"),
            1,
            0,
            Arc::new(Variables::new()),
            StopSignal::new(),
        );
        (0..n)
            .map(|_| {
                counter
                    .process(&mut ctx)
                    .unwrap_or_else(|e| panic!("process failed: {e}"));
                match ctx.get("n") {
                    Some(Value::I64(v)) => *v,
                    other => panic!("unexpected counter value: {other:?}"),
                }
            })
            .collect()
    }

    #[test]
    fn counts_and_wraps_at_end() {
        let mut c = Counter::new("n").with_start(0).with_increment(2).with_end(4);
        assert_eq!(values(&mut c, 5), vec![0, 2, 4, 0, 2]);
    }

    #[test]
    fn counts_down_to_end() {
        let mut c = Counter::new("n").with_start(3).with_increment(-1).with_end(2);
        assert_eq!(values(&mut c, 3), vec![3, 2, 3]);
    }

    #[test]
    fn thread_start_resets_the_count() {
        let mut c = Counter::new("n");
        assert_eq!(values(&mut c, 2), vec![1, 2]);

        let mut ctx = ThreadContext::new(
            Arc::from("g"),
            1,
            0,
            Arc::new(Variables::new()),
            StopSignal::new(),
        );
        c.thread_started(&mut ctx)
            .unwrap_or_else(|e| panic!("thread_started failed: {e}"));
        assert_eq!(values(&mut c, 1), vec![1]);
    }
}
