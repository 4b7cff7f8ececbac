//! Structured events emitted by the volume service and probe, sunk
//! through an interface so the real collector (out of scope, spec §1)
//! can be swapped in without touching the core.

use std::fmt;

#[derive(Debug, Clone)]
pub enum Event {
    ProbeSucceeded,
    ProbeFailed { reason: String },
    VolumeCreated { name: String, capacity_bytes: u64 },
    VolumeDeleted { name: String },
    VolumePublished { volume_id: String, target_path: String },
    VolumeUnpublished { volume_id: String, target_path: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ProbeSucceeded => write!(f, "probe_succeeded"),
            Event::ProbeFailed { reason } => write!(f, "probe_failed reason=\"{}\"", reason),
            Event::VolumeCreated {
                name,
                capacity_bytes,
            } => write!(
                f,
                "volume_created name={} capacity_bytes={}",
                name, capacity_bytes
            ),
            Event::VolumeDeleted { name } => write!(f, "volume_deleted name={}", name),
            Event::VolumePublished {
                volume_id,
                target_path,
            } => write!(
                f,
                "volume_published volume_id={} target_path={}",
                volume_id, target_path
            ),
            Event::VolumeUnpublished {
                volume_id,
                target_path,
            } => write!(
                f,
                "volume_unpublished volume_id={} target_path={}",
                volume_id, target_path
            ),
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: Event);
}

/// Always-available substitute for the real collector: logs every event
/// at `info`.
#[derive(Debug, Default)]
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn record(&self, event: Event) {
        log::info!("{}", event);
    }
}
