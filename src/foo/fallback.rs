//! CPU fallback bridge for the `foo` backend.
//!
//! Catches every operator without a `foo` kernel, warns once per operator,
//! and hands the call to [`cpu_fallback`].

use std::sync::Arc;

use dashmap::DashSet;

use crate::backend::DispatchKey;
use crate::diagnostics::{self, Diagnostic, DiagnosticSink};
use crate::error::Result;
use crate::ops::dispatch::{Dispatcher, OperatorHandle};
use crate::ops::fallback::cpu_fallback;
use crate::ops::ivalue::Stack;

/// Fallback kernel with a process-lifetime "already warned" set.
///
/// The set only grows. Concurrent first calls for the same operator race on
/// a single `DashSet::insert`, so each operator is reported exactly once.
#[derive(Default)]
pub struct CpuFallback {
    warned: DashSet<String>,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl CpuFallback {
    /// Reports through the process-wide sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports through `sink` instead of the process-wide one.
    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { warned: DashSet::new(), sink: Some(sink) }
    }

    pub fn has_warned(&self, op: &str) -> bool {
        self.warned.contains(op)
    }

    pub fn warned_count(&self) -> usize {
        self.warned.len()
    }

    fn emit(&self, event: Diagnostic) {
        match &self.sink {
            Some(sink) => sink.report(&event),
            None => diagnostics::report(event),
        }
    }

    pub fn call(&self, op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
        let name = op.name().as_str();
        if !self.warned.contains(name) && self.warned.insert(name.to_owned()) {
            self.emit(Diagnostic::CpuFallback { op: name.to_owned() });
        }
        cpu_fallback(op, stack)
    }

    /// Installs this bridge as the `PrivateUse1` catch-all of `dispatcher`.
    pub fn register(self: Arc<Self>, dispatcher: &Dispatcher) -> Result<()> {
        dispatcher
            .library(DispatchKey::PrivateUse1)
            .fallback(move |op, stack| self.call(op, stack))?;
        Ok(())
    }
}

impl core::fmt::Debug for CpuFallback {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CpuFallback").field("warned", &self.warned.len()).finish()
    }
}
