use std::sync::Arc;

use hammr_value::Value;

use crate::runner::StopSignal;

/// Variable maintained by the runner after every sample: `"true"` or `"false"`.
pub const LAST_SAMPLE_OK: &str = "hammr.last_sample_ok";

/// Name → value variable store of one thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    map: ahash::AHashMap<Arc<str>, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// The variable as a string slice, if it holds a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(Value::as_str)
    }

    pub fn put(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Option<Value> {
        self.map.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.map.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Copies every variable of `other` into `self`, overwriting duplicates.
    pub fn extend_from(&mut self, other: &Variables) {
        for (k, v) in &other.map {
            self.map.insert(k.clone(), v.clone());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Variables
where
    K: Into<Arc<str>>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Control-flow request an element can make for its own thread.
///
/// Ordered by severity; when several are requested in one iteration the most severe wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadAction {
    /// Abandon the rest of the current iteration and start the next one.
    StartNextLoop,
    /// End this thread after the current iteration.
    StopThread,
    /// Stop every thread of the test, letting in-flight iterations finish.
    StopTest,
    /// Stop every thread of the test and interrupt in-flight samplers.
    StopTestNow,
}

/// Per-thread mutable state handed to every pipeline element.
///
/// Each virtual thread owns exactly one context for its whole lifetime; nothing else
/// holds a reference to it, so no synchronization is involved.
#[derive(Debug)]
pub struct ThreadContext {
    group: Arc<str>,
    thread_num: u64,
    thread_name: Arc<str>,
    iteration: u64,
    vars: Variables,
    seed: Arc<Variables>,
    stop: Arc<StopSignal>,
    action: Option<ThreadAction>,
}

impl ThreadContext {
    /// `thread_num` is 0-based within the group; the thread name uses 1-based numbering
    /// (`"<group> <group_num>-<thread_num + 1>"`).
    pub fn new(
        group: Arc<str>,
        group_num: usize,
        thread_num: u64,
        seed: Arc<Variables>,
        stop: Arc<StopSignal>,
    ) -> Self {
        let thread_name: Arc<str> =
            Arc::from(format!("{group} {group_num}-{}", thread_num.saturating_add(1)));
        Self {
            group,
            thread_num,
            thread_name,
            iteration: 0,
            vars: (*seed).clone(),
            seed,
            stop,
            action: None,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn thread_num(&self) -> u64 {
        self.thread_num
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub(crate) fn thread_name_arc(&self) -> Arc<str> {
        self.thread_name.clone()
    }

    /// 0-based index of the current (or last started) iteration.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.vars
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.vars.get_str(name)
    }

    pub fn put(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Option<Value> {
        self.vars.put(name, value)
    }

    /// True once a stop of this thread has been requested (either tier).
    pub fn is_cancelled(&self) -> bool {
        self.stop.is_stopping()
    }

    pub fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    /// Resolves when in-flight work should be abandoned. Long-running samplers can race
    /// their I/O against this to honour `stop_now`.
    pub async fn stopped_now(&self) {
        self.stop.stopped_now().await;
    }

    pub fn request(&mut self, action: ThreadAction) {
        self.action = Some(match self.action {
            Some(prev) => prev.max(action),
            None => action,
        });
    }

    pub(crate) fn pending_action(&self) -> Option<ThreadAction> {
        self.action
    }

    pub(crate) fn take_action(&mut self) -> Option<ThreadAction> {
        self.action.take()
    }

    pub(crate) fn begin_iteration(&mut self, iteration: u64, reset_variables: bool) {
        self.iteration = iteration;
        if reset_variables {
            self.vars = (*self.seed).clone();
        }
    }
}
