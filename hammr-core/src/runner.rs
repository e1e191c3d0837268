mod config;
mod error;
mod group;
mod plan;
mod signal;
mod vu;

pub use config::{LoopCount, OnSampleError, StopCondition, ThreadGroupConfig, ThreadGroupOptions};
pub use error::{Error, Result};
pub use group::{GroupHandle, GroupReport, StopHandle, ThreadGroup};
pub use plan::{PlanHandle, PlanReport, TestPlan};
pub use signal::{StopLevel, StopSignal};
pub use vu::{ThreadExit, ThreadReport};
