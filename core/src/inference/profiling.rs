//! Control of the native execution profiler.
//!
//! ```text
//! Idle --start--> Active --end--> Stopped(pending) --read--> Stopped(consumed)
//!   ^                                                              |
//!   +--------------------------- disable --------------------------+
//! ```
//!
//! `disable` is accepted from any state.

use serde::{Deserialize, Serialize};
use std::ffi::CString;
use tracing::debug;

use crate::error::{Caffe2Error, Result};

/// Where the profiler lives. Implemented by the session's native predictor.
pub trait ProfileTarget {
    fn start(&self, name: &CString, metadata: &CString);
    fn end(&self);
    /// The serialized trace, or `None` when the runtime returned nothing.
    fn read(&self) -> Option<Vec<u8>>;
    fn disable(&self);
}

/// Profiler state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProfilerState {
    #[default]
    Idle,
    Active {
        name: String,
        metadata: String,
    },
    Stopped {
        pending: bool,
    },
}

/// Finite-state controller for one predictor's profiler.
#[derive(Debug, Default)]
pub struct ProfilingSession {
    state: ProfilerState,
}

impl ProfilingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ProfilerState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ProfilerState::Active { .. })
    }

    /// Begin recording subsequent runs.
    pub fn start(&mut self, target: &impl ProfileTarget, name: &str, metadata: &str) -> Result<()> {
        if self.is_active() {
            return Err(Caffe2Error::ProfilingAlreadyActive);
        }
        let c_name = CString::new(name)
            .map_err(|_| Caffe2Error::config("profile name contains a NUL byte"))?;
        let c_metadata = CString::new(metadata)
            .map_err(|_| Caffe2Error::config("profile metadata contains a NUL byte"))?;

        target.start(&c_name, &c_metadata);
        debug!("Profiling started: {}", name);
        self.state = ProfilerState::Active {
            name: name.to_string(),
            metadata: metadata.to_string(),
        };
        Ok(())
    }

    /// Stop recording. The trace becomes readable once.
    pub fn end(&mut self, target: &impl ProfileTarget) -> Result<()> {
        if !self.is_active() {
            return Err(Caffe2Error::ProfileNotReady);
        }
        target.end();
        self.state = ProfilerState::Stopped { pending: true };
        Ok(())
    }

    /// Take the finished trace.
    pub fn read(&mut self, target: &impl ProfileTarget) -> Result<TraceBuffer> {
        if self.state != (ProfilerState::Stopped { pending: true }) {
            return Err(Caffe2Error::ProfileNotReady);
        }
        let bytes = target.read().ok_or(Caffe2Error::ProfileReadFailure)?;
        self.state = ProfilerState::Stopped { pending: false };
        Ok(TraceBuffer(bytes))
    }

    /// Reset to idle and free any recorded profile.
    pub fn disable(&mut self, target: &impl ProfileTarget) {
        target.disable();
        self.state = ProfilerState::Idle;
    }
}

/// Serialized trace exactly as the runtime produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceBuffer(Vec<u8>);

impl TraceBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the JSON trace emitted by the Caffe2 bridge.
    pub fn decode(&self) -> Result<ProfileTrace> {
        Ok(serde_json::from_slice(&self.0)?)
    }
}

/// A net-level profile with one entry per executed operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTrace {
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    /// Start time in nanoseconds since the Unix epoch.
    pub start: u64,
    /// End time in nanoseconds since the Unix epoch.
    pub end: u64,
    #[serde(default)]
    pub elements: Vec<ProfileEntry>,
}

/// Timing of a single operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// Operator type.
    pub name: String,
    /// Operator name in the net.
    #[serde(default)]
    pub metadata: String,
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub thread_id: u64,
    #[serde(default)]
    pub layer_sequence_index: usize,
    /// Input tensor shapes.
    #[serde(default)]
    pub shapes: Vec<Vec<i64>>,
}

impl ProfileTrace {
    /// Wall time of the whole run in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Entries in layer order.
    pub fn layers(&self) -> Vec<&ProfileEntry> {
        let mut layers: Vec<_> = self.elements.iter().collect();
        layers.sort_by_key(|e| (e.layer_sequence_index, e.start));
        layers
    }
}

impl ProfileEntry {
    pub fn duration_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}
