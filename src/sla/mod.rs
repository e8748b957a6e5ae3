mod chart;
mod fleet;
mod liveness;
mod report;
mod threshold;
mod window;

pub use chart::*;
pub use fleet::*;
pub use liveness::*;
pub use report::*;
pub use threshold::*;
pub use window::*;

use crate::db::{AgentType, CheckRecord};

/// A record together with the status it counts as.
#[derive(Debug, Clone)]
pub struct ClassifiedRecord {
    pub agent_type: AgentType,
    pub record: CheckRecord,
    pub status: IntervalStatus,
}

impl ClassifiedRecord {
    pub fn interval(&self) -> Interval<'_> {
        Interval {
            agent_id: &self.record.agent_id,
            timestamp: self.record.timestamp,
            status: self.status,
        }
    }
}

/// A profile's target, or `default` when it is outside (0, 100].
pub fn effective_target(target: f64, default: f64) -> f64 {
    if target > 0.0 && target <= 100.0 {
        target
    } else {
        default
    }
}
