//! Device-state transitions for the `foo` backend.
//!
//! The active device is thread-local: two threads selecting different
//! devices never see each other's choice. It starts out unset, which
//! [`FooGuardImpl::get_device`] reports as a device without an index.
//!
//! `foo` executes synchronously on a single implicit stream, so stream
//! operations are trivial and events are unsupported.

use core::cell::Cell;
use core::sync::atomic::{AtomicU8, Ordering};

use snafu::{OptionExt, ensure};

use crate::backend::{Device, DeviceIndex, DeviceType, backend_name};
use crate::config::DEFAULT_DEVICE_COUNT;
use crate::error::{InvalidDeviceIndexSnafu, MissingDeviceIndexSnafu, Result, UnsupportedSnafu};
use crate::guard::{DeviceGuardImpl, Event, EventFlag, InlineGuardImpl, Stream};

thread_local! {
    static CURRENT_DEVICE: Cell<Option<DeviceIndex>> = const { Cell::new(None) };
}

static DEVICE_COUNT: AtomicU8 = AtomicU8::new(DEFAULT_DEVICE_COUNT);

pub(crate) fn set_device_count(count: DeviceIndex) {
    DEVICE_COUNT.store(count, Ordering::Relaxed);
}

/// Index of the calling thread's active `foo` device, if one was ever set.
pub fn current_device() -> Option<DeviceIndex> {
    CURRENT_DEVICE.with(Cell::get)
}

fn store_current(index: Option<DeviceIndex>) {
    CURRENT_DEVICE.with(|current| current.set(index));
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FooGuardImpl;

impl FooGuardImpl {
    pub const fn new() -> Self {
        Self
    }

    /// Returns the index of `device` once it is known to exist.
    ///
    /// # Panics
    /// Panics if `device` is not a `foo` device.
    fn checked_index(&self, device: Device) -> Result<DeviceIndex> {
        assert_eq!(
            device.device_type(),
            DeviceType::PrivateUse1,
            "{} guard received a {} device",
            backend_name(),
            device.device_type()
        );
        let index = device.index().context(MissingDeviceIndexSnafu { backend: backend_name() })?;
        let count = self.device_count();
        ensure!(index < count, InvalidDeviceIndexSnafu { backend: backend_name(), index, count });
        Ok(index)
    }
}

impl DeviceGuardImpl for FooGuardImpl {
    fn device_type(&self) -> DeviceType {
        DeviceType::PrivateUse1
    }

    fn exchange_device(&self, device: Device) -> Result<Device> {
        let index = self.checked_index(device)?;
        let previous = current_device();
        if previous != Some(index) {
            store_current(Some(index));
        }
        Ok(Device::new(DeviceType::PrivateUse1, previous))
    }

    fn get_device(&self) -> Device {
        Device::new(DeviceType::PrivateUse1, current_device())
    }

    fn set_device(&self, device: Device) -> Result<()> {
        let index = self.checked_index(device)?;
        if current_device() != Some(index) {
            store_current(Some(index));
        }
        Ok(())
    }

    fn unchecked_set_device(&self, device: Device) {
        debug_assert_eq!(device.device_type(), DeviceType::PrivateUse1);
        store_current(device.index());
    }

    fn get_stream(&self, device: Device) -> Stream {
        Stream::default_for(device)
    }

    /// Always the default stream of the calling thread's current device.
    fn exchange_stream(&self, _stream: Stream) -> Stream {
        Stream::default_for(self.get_device())
    }

    fn device_count(&self) -> DeviceIndex {
        DEVICE_COUNT.load(Ordering::Relaxed)
    }

    fn query_stream(&self, _stream: &Stream) -> Result<bool> {
        Ok(true)
    }

    fn synchronize_stream(&self, _stream: &Stream) -> Result<()> {
        Ok(())
    }

    fn record(
        &self,
        _event: &mut Option<Event>,
        _stream: &Stream,
        _device_index: DeviceIndex,
        _flag: EventFlag,
    ) -> Result<()> {
        UnsupportedSnafu { backend: backend_name(), capability: "event recording" }.fail()
    }

    fn block(&self, _event: &Event, _stream: &Stream) -> Result<()> {
        UnsupportedSnafu { backend: backend_name(), capability: "event blocking" }.fail()
    }

    fn query_event(&self, _event: &Event) -> Result<bool> {
        UnsupportedSnafu { backend: backend_name(), capability: "event querying" }.fail()
    }

    fn destroy_event(&self, _event: Event, _device_index: DeviceIndex) {}
}

impl InlineGuardImpl for FooGuardImpl {
    fn for_device_type(device_type: DeviceType) -> Result<Self> {
        assert_eq!(
            device_type,
            DeviceType::PrivateUse1,
            "{} guard cannot manage {device_type} devices",
            backend_name()
        );
        Ok(Self)
    }
}

pub static FOO_GUARD_IMPL: FooGuardImpl = FooGuardImpl::new();
