//! Backend diagnostics.
//!
//! Kernels, the allocator and the fallback describe what they do as
//! [`Diagnostic`] events and hand them to a [`DiagnosticSink`]. The default
//! sink forwards to `tracing`; tests install a [`RecordingSink`] to count
//! events without parsing log output.
//!
//! Sinks cannot fail, and nothing a sink does affects operator results.

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

use crate::backend::{Device, DeviceIndex};

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The plugin finished registering itself.
    BackendRegistered { name: String, device_count: DeviceIndex },
    Allocate { device: Device, nbytes: usize, ptr: usize },
    Free { ptr: usize },
    /// A backend-specific kernel ran.
    KernelCalled { op: &'static str, device: Device },
    /// An operator without a backend kernel was sent to the CPU. Reported
    /// once per operator.
    CpuFallback { op: String },
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, event: &Diagnostic);
}

/// Emits events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, event: &Diagnostic) {
        match event {
            Diagnostic::BackendRegistered { name, device_count } => {
                tracing::info!(backend = %name, device_count, "backend registered");
            }
            Diagnostic::Allocate { device, nbytes, ptr } => {
                tracing::debug!(
                    device = %device,
                    nbytes,
                    ptr = format_args!("{ptr:#x}"),
                    "allocate"
                );
            }
            Diagnostic::Free { ptr } => {
                tracing::debug!(ptr = format_args!("{ptr:#x}"), "free");
            }
            Diagnostic::KernelCalled { op, device } => {
                tracing::debug!(op, device = %device, "kernel called");
            }
            Diagnostic::CpuFallback { op } => {
                tracing::warn!(
                    op = %op,
                    "operator is not supported on this backend, falling back to CPU"
                );
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, event: &Diagnostic) {
        self.events.lock().push(event.clone());
    }
}

lazy_static! {
    static ref SINK: RwLock<Arc<dyn DiagnosticSink>> = RwLock::new(Arc::new(TracingSink));
}

/// Replaces the process-wide sink, returning the previous one.
pub fn set_sink(sink: Arc<dyn DiagnosticSink>) -> Arc<dyn DiagnosticSink> {
    std::mem::replace(&mut *SINK.write(), sink)
}

pub fn sink() -> Arc<dyn DiagnosticSink> {
    Arc::clone(&SINK.read())
}

/// Sends `event` to the process-wide sink.
pub fn report(event: Diagnostic) {
    sink().report(&event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_counts_matching_events() {
        let sink = RecordingSink::new();
        sink.report(&Diagnostic::Free { ptr: 1 });
        sink.report(&Diagnostic::CpuFallback { op: "neg".into() });
        sink.report(&Diagnostic::Free { ptr: 2 });
        assert_eq!(sink.count(|e| matches!(e, Diagnostic::Free { .. })), 2);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        sink.report(&Diagnostic::BackendRegistered { name: "foo".into(), device_count: 2 });
        sink.report(&Diagnostic::KernelCalled { op: "add.Tensor", device: Device::privateuse1(0) });
    }
}
