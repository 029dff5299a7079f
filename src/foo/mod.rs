//! # The `foo` backend
//!
//! A dummy out-of-tree device that claims the `PrivateUse1` slot. It keeps
//! its memory on the host, runs synchronously, and supplies kernels for
//! construction, copies, `fill_` and `add`; every other operator falls back
//! to the CPU.
//!
//! ## Submodules
//!
//! - [`allocator`] - host-backed allocator tagged with the active device
//! - [`guard_impl`] - thread-local active device and stream/event stubs
//! - [`guard`] - RAII device guard used by the kernels
//! - [`kernels`] - operator overrides
//! - [`fallback`] - warn-once CPU fallback bridge
//!
//! Nothing is registered until [`initialize`] runs:
//!
//! ```rust
//! use foo_backend::backend::Device;
//! use foo_backend::{foo, ops, tensor};
//!
//! foo::initialize().unwrap();
//! let a = tensor!([1.0, 2.0]).to_device("foo:0".parse::<Device>().unwrap()).unwrap();
//! let b = ops::add(&a, &a).unwrap();
//! assert_eq!(b.device().to_string(), "foo:0");
//! ```

pub mod allocator;
pub mod fallback;
pub mod guard;
pub mod guard_impl;
pub mod kernels;

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use snafu::ensure;

use crate::alloc::register_allocator;
use crate::backend::{DeviceIndex, DeviceType, register_backend_name};
use crate::config::BackendConfig;
use crate::diagnostics::{Diagnostic, report};
use crate::error::{AlreadyInitializedSnafu, Result};
use crate::guard::{DeviceGuardImpl, register_guard_impl};
use crate::ops::dispatch::dispatcher;

use allocator::FOO_ALLOCATOR;
use fallback::CpuFallback;
pub use guard_impl::current_device;
use guard_impl::FOO_GUARD_IMPL;

lazy_static! {
    static ref INITIALIZED: Mutex<Option<BackendConfig>> = Mutex::new(None);
}

/// Registers the backend with the default configuration.
pub fn initialize() -> Result<()> {
    initialize_with(BackendConfig::default())
}

/// Registers the backend's name, device guard, allocator, kernels and CPU
/// fallback with the process-wide runtime.
///
/// Calling it again with the same configuration does nothing; a different
/// configuration is rejected.
pub fn initialize_with(config: BackendConfig) -> Result<()> {
    config.validate()?;
    let mut state = INITIALIZED.lock();
    if let Some(existing) = state.as_ref() {
        ensure!(*existing == config, AlreadyInitializedSnafu);
        return Ok(());
    }

    register_backend_name(config.name())?;
    guard_impl::set_device_count(config.device_count());
    allocator::set_report_allocations(config.report_allocations());
    register_guard_impl(DeviceType::PrivateUse1, &FOO_GUARD_IMPL)?;
    register_allocator(DeviceType::PrivateUse1, &FOO_ALLOCATOR)?;
    kernels::register(dispatcher())?;
    Arc::new(CpuFallback::new()).register(dispatcher())?;

    report(Diagnostic::BackendRegistered {
        name: config.name().to_owned(),
        device_count: config.device_count(),
    });
    *state = Some(config);
    Ok(())
}

pub fn is_initialized() -> bool {
    INITIALIZED.lock().is_some()
}

/// Number of `foo` devices the process was configured with.
pub fn device_count() -> DeviceIndex {
    FOO_GUARD_IMPL.device_count()
}

/// Whether the backend is registered and has at least one device.
pub fn is_available() -> bool {
    is_initialized() && device_count() > 0
}
