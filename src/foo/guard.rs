//! Scoped device guard for `foo` kernels.

use crate::backend::{Device, DeviceIndex, DeviceType};
use crate::error::Result;
use crate::guard::InlineDeviceGuard;

use super::guard_impl::FooGuardImpl;

/// Makes a `foo` device current until dropped, then restores whichever
/// device was current before, including "none set".
///
/// A guard cannot be built without a target, cannot be cloned, and cannot
/// leave the thread it was created on.
///
/// ```
/// use foo_backend::backend::Device;
/// use foo_backend::foo::{self, guard::FooDeviceGuard, guard_impl::current_device};
///
/// foo::initialize().unwrap();
/// let before = current_device();
/// {
///     let guard = FooDeviceGuard::with_index(1).unwrap();
///     assert_eq!(guard.current_device(), Device::privateuse1(1));
///     assert_eq!(current_device(), Some(1));
/// }
/// assert_eq!(current_device(), before);
/// ```
#[derive(Debug)]
pub struct FooDeviceGuard {
    guard: InlineDeviceGuard<FooGuardImpl>,
}

impl FooDeviceGuard {
    /// # Panics
    /// Panics if `device` is not a `foo` device.
    pub fn new(device: Device) -> Result<Self> {
        Ok(Self { guard: InlineDeviceGuard::new(device)? })
    }

    pub fn with_index(index: DeviceIndex) -> Result<Self> {
        Ok(Self { guard: InlineDeviceGuard::with_index(DeviceType::PrivateUse1, index)? })
    }

    pub fn set_device(&mut self, device: Device) -> Result<()> {
        self.guard.set_device(device)
    }

    /// Restores the original device, then makes `device` current.
    pub fn reset_device(&mut self, device: Device) -> Result<()> {
        self.guard.reset_device(device)
    }

    pub fn set_index(&mut self, index: DeviceIndex) -> Result<()> {
        self.guard.set_index(index)
    }

    pub fn original_device(&self) -> Device {
        self.guard.original_device()
    }

    pub fn current_device(&self) -> Device {
        self.guard.current_device()
    }
}
