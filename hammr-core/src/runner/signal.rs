use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// How far a stop request has escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StopLevel {
    Running = 0,
    /// Finish the current iteration, then exit.
    Stop = 1,
    /// Abort the in-flight sampler as soon as possible, then exit.
    StopNow = 2,
}

impl StopLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Stop,
            _ => Self::StopNow,
        }
    }
}

/// Two-tier cooperative cancellation flag.
///
/// Signals form a tree: raising a parent (a test plan) raises every child (its thread
/// groups). The level only ever increases.
#[derive(Debug, Default)]
pub struct StopSignal {
    level: AtomicU8,
    notify: Notify,
    children: Mutex<Vec<Weak<StopSignal>>>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a signal that is raised whenever `self` is raised.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let mut children = self.children.lock();
        children.retain(|c| c.strong_count() > 0);

        let child = Arc::new(Self {
            level: AtomicU8::new(self.level.load(Ordering::Acquire)),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        });
        children.push(Arc::downgrade(&child));
        child
    }

    pub fn stop(&self) {
        self.raise(StopLevel::Stop);
    }

    pub fn stop_now(&self) {
        self.raise(StopLevel::StopNow);
    }

    pub fn level(&self) -> StopLevel {
        StopLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    pub fn is_stopping(&self) -> bool {
        self.level() >= StopLevel::Stop
    }

    pub fn is_stopping_now(&self) -> bool {
        self.level() >= StopLevel::StopNow
    }

    /// Resolves once the level reaches at least `level`.
    pub async fn reached(&self, level: StopLevel) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a raise in between is not lost.
            notified.as_mut().enable();

            if self.level() >= level {
                return;
            }
            notified.await;
        }
    }

    pub async fn stopped(&self) {
        self.reached(StopLevel::Stop).await;
    }

    pub async fn stopped_now(&self) {
        self.reached(StopLevel::StopNow).await;
    }

    fn raise(&self, to: StopLevel) {
        let prev = self.level.fetch_max(to as u8, Ordering::AcqRel);
        if prev >= to as u8 {
            return;
        }
        self.notify.notify_waiters();

        let children = self.children.lock();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.raise(to);
        }
    }
}
