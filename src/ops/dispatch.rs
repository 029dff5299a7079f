//! Operation Dispatch Layer
//!
//! This module routes each operator call to a kernel at runtime, based on
//! the dispatch keys of its arguments.
//!
//! Each call resolves in priority order:
//! 1. The kernel registered for `(operator, key)`
//! 2. The fallback kernel registered for `key`
//! 3. Otherwise the call fails with [`Error::NotImplemented`](crate::error::Error::NotImplemented)
//!
//! # Design Highlights
//! - **Pluggable**: backends add kernels for their key without touching the table's owner
//! - **Explicit**: registering twice for the same slot is an error, never an overwrite
//! - **Boxed**: kernels take a [`Stack`], so a single fallback can serve every operator
//!
//! # Example
//! ```rust
//! use foo_backend::ops::dispatch::dispatcher;
//! use foo_backend::ops::ivalue::IValue;
//! use foo_backend::tensor;
//!
//! let a = tensor!([1.0, 2.0]);
//! let mut stack = vec![IValue::from(a)];
//! dispatcher().call("neg", &mut stack).unwrap();
//! let out = stack.pop().unwrap().into_tensor().unwrap();
//! assert_eq!(out.to_vec::<f64>().unwrap(), vec![-1.0, -2.0]);
//! ```

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use snafu::{OptionExt, ensure};

use super::ivalue::{IValue, Stack};
use crate::backend::DispatchKey;
use crate::error::{
    DuplicateFallbackSnafu, DuplicateKernelSnafu, InvalidArgumentSnafu, NotImplementedSnafu, Result,
};
use crate::tensors::Tensor;

/// `name.overload`, e.g. `add.Tensor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorName(String);

impl OperatorName {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self(full_name.into())
    }

    /// Name without the overload.
    pub fn base(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(base, _)| base)
    }

    pub fn overload(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, overload)| overload)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// In-place operators end in `_` and return their mutated `self`.
    pub fn is_inplace(&self) -> bool {
        let base = self.base();
        base.ends_with('_') && !base.ends_with("__")
    }
}

impl fmt::Display for OperatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperatorName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The operator being invoked, plus the dispatcher invoking it.
#[derive(Clone, Copy)]
pub struct OperatorHandle<'a> {
    name: &'a OperatorName,
    key: DispatchKey,
    dispatcher: &'a Dispatcher,
}

impl<'a> OperatorHandle<'a> {
    pub fn name(&self) -> &'a OperatorName {
        self.name
    }

    /// The key this call was dispatched with.
    pub fn key(&self) -> DispatchKey {
        self.key
    }

    pub fn dispatcher(&self) -> &'a Dispatcher {
        self.dispatcher
    }

    /// Calls the same operator again under another dispatch key.
    pub fn redispatch(&self, key: DispatchKey, stack: &mut Stack) -> Result<()> {
        self.dispatcher.call_with_key(self.name.as_str(), key, stack)
    }
}

impl fmt::Debug for OperatorHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorHandle").field("name", &self.name).field("key", &self.key).finish()
    }
}

pub type BoxedKernel = Arc<dyn Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync>;

/// Per-(operator, dispatch key) kernel table with per-key fallbacks.
pub struct Dispatcher {
    kernels: RwLock<HashMap<(OperatorName, DispatchKey), BoxedKernel>>,
    fallbacks: RwLock<HashMap<DispatchKey, BoxedKernel>>,
}

impl Dispatcher {
    /// An empty table, with no reference kernels.
    pub fn new() -> Self {
        Self { kernels: RwLock::new(HashMap::new()), fallbacks: RwLock::new(HashMap::new()) }
    }

    /// A table holding the reference backend's kernels.
    pub fn with_reference_kernels() -> Self {
        let kernels = super::cpu::reference_kernels()
            .into_iter()
            .map(|(name, kernel)| ((OperatorName::new(name), DispatchKey::Cpu), kernel))
            .collect();
        Self { kernels: RwLock::new(kernels), fallbacks: RwLock::new(HashMap::new()) }
    }

    /// Registration helper bound to one dispatch key.
    pub fn library(&self, key: DispatchKey) -> Library<'_> {
        Library { dispatcher: self, key }
    }

    pub fn register_kernel<F>(&self, op: &str, key: DispatchKey, kernel: F) -> Result<()>
    where
        F: Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        let slot = (OperatorName::new(op), key);
        let mut kernels = self.kernels.write();
        ensure!(!kernels.contains_key(&slot), DuplicateKernelSnafu { op, key });
        kernels.insert(slot, Arc::new(kernel));
        Ok(())
    }

    pub fn register_fallback<F>(&self, key: DispatchKey, kernel: F) -> Result<()>
    where
        F: Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        let mut fallbacks = self.fallbacks.write();
        ensure!(!fallbacks.contains_key(&key), DuplicateFallbackSnafu { key });
        fallbacks.insert(key, Arc::new(kernel));
        Ok(())
    }

    pub fn has_kernel(&self, op: &str, key: DispatchKey) -> bool {
        self.kernels.read().contains_key(&(OperatorName::new(op), key))
    }

    pub fn has_fallback(&self, key: DispatchKey) -> bool {
        self.fallbacks.read().contains_key(&key)
    }

    /// Calls `op` with the highest-priority key among its arguments.
    pub fn call(&self, op: &str, stack: &mut Stack) -> Result<()> {
        self.call_with_key(op, compute_dispatch_key(stack), stack)
    }

    /// Calls `op` with an explicit dispatch key.
    pub fn call_with_key(&self, op: &str, key: DispatchKey, stack: &mut Stack) -> Result<()> {
        let name = OperatorName::new(op);
        let kernel = {
            let kernels = self.kernels.read();
            kernels.get(&(name.clone(), key)).cloned()
        };
        let kernel = match kernel {
            Some(kernel) => kernel,
            None => {
                self.fallbacks.read().get(&key).cloned().context(NotImplementedSnafu { op, key })?
            }
        };

        let handle = OperatorHandle { name: &name, key, dispatcher: self };
        kernel(&handle, stack)
    }

    /// Calls `op` and pops its single tensor result.
    pub fn call_tensor(&self, op: &str, mut stack: Stack) -> Result<Tensor> {
        self.call(op, &mut stack)?;
        pop_tensor(op, &mut stack)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kernels: Vec<String> =
            self.kernels.read().keys().map(|(name, key)| format!("{name}[{key}]")).collect();
        kernels.sort();
        f.debug_struct("Dispatcher")
            .field("kernels", &kernels)
            .field("fallbacks", &self.fallbacks.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Pops the tensor a kernel left on top of the stack.
pub fn pop_tensor(op: &str, stack: &mut Stack) -> Result<Tensor> {
    stack
        .pop()
        .and_then(IValue::into_tensor)
        .context(InvalidArgumentSnafu { op, name: "return", reason: "expected a tensor result" })
}

/// Highest-priority key among tensor and device arguments; `Cpu` if none.
pub fn compute_dispatch_key(stack: &[IValue]) -> DispatchKey {
    stack
        .iter()
        .filter_map(|value| match value {
            IValue::Tensor(t) => Some(t.device().device_type().dispatch_key()),
            IValue::Device(d) => Some(d.device_type().dispatch_key()),
            _ => None,
        })
        .max()
        .unwrap_or(DispatchKey::Cpu)
}

/// Registers kernels for one dispatch key.
///
/// Calls chain: `lib.impl_kernel("a", ..)?.impl_kernel("b", ..)?;`
#[derive(Debug, Clone, Copy)]
pub struct Library<'a> {
    dispatcher: &'a Dispatcher,
    key: DispatchKey,
}

impl<'a> Library<'a> {
    pub fn key(&self) -> DispatchKey {
        self.key
    }

    pub fn impl_kernel<F>(&self, op: &str, kernel: F) -> Result<&Self>
    where
        F: Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register_kernel(op, self.key, kernel)?;
        Ok(self)
    }

    /// Registers the catch-all kernel for every operator without a kernel
    /// under this key.
    pub fn fallback<F>(&self, kernel: F) -> Result<&Self>
    where
        F: Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register_fallback(self.key, kernel)?;
        Ok(self)
    }
}

lazy_static! {
    static ref DISPATCHER: Dispatcher = Dispatcher::with_reference_kernels();
}

/// The process-wide dispatcher.
pub fn dispatcher() -> &'static Dispatcher {
    &DISPATCHER
}
