//! Device guards.
//!
//! A backend integrates with "current device" handling by implementing
//! [`DeviceGuardImpl`] and registering it for its device type. Code that needs
//! a device to be active for a scope then uses one of two RAII wrappers:
//!
//! - [`InlineDeviceGuard<T>`] calls a concrete implementation directly. Backends
//!   wrap it in their own guard type for use inside their kernels.
//! - [`DeviceGuard`] / [`OptionalDeviceGuard`] look the implementation up in the
//!   registry by the runtime device type, for generic code.
//!
//! Both capture the device that was active on entry and restore it on drop
//! through `unchecked_set_device`, which cannot fail. Guards are `!Send`: the
//! state they restore belongs to the thread that created them.

use core::fmt;
use core::marker::PhantomData;
use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use snafu::{OptionExt, ensure};

use crate::backend::{Device, DeviceIndex, DeviceType};
use crate::error::{
    AlreadyRegisteredSnafu, InvalidArgumentSnafu, NotRegisteredSnafu, Result, UnsupportedSnafu,
};

pub type StreamId = u64;

/// A work queue on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream {
    id: StreamId,
    device: Device,
}

impl Stream {
    pub const DEFAULT: StreamId = 0;

    pub const fn new(id: StreamId, device: Device) -> Self {
        Self { id, device }
    }

    /// The default stream of `device`.
    pub const fn default_for(device: Device) -> Self {
        Self::new(Self::DEFAULT, device)
    }

    pub const fn id(&self) -> StreamId {
        self.id
    }

    pub const fn device(&self) -> Device {
        self.device
    }

    pub const fn is_default(&self) -> bool {
        self.id == Self::DEFAULT
    }
}

/// How an event records timing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFlag {
    #[default]
    Default,
    BackendDefault,
}

/// Opaque backend event handle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Event(usize);

impl Event {
    pub const fn from_raw(handle: usize) -> Self {
        Self(handle)
    }

    pub const fn raw(&self) -> usize {
        self.0
    }
}

/// Per-backend device-state transitions.
///
/// Every method taking a [`Device`] expects it to carry this implementation's
/// device type; implementations treat anything else as a fatal contract
/// violation.
pub trait DeviceGuardImpl: Send + Sync {
    fn device_type(&self) -> DeviceType;

    /// Makes `device` current and returns the previously current device.
    fn exchange_device(&self, device: Device) -> Result<Device>;

    fn get_device(&self) -> Device;

    fn set_device(&self, device: Device) -> Result<()>;

    /// Like `set_device`, without validation. Used on restore paths.
    fn unchecked_set_device(&self, device: Device);

    fn get_stream(&self, device: Device) -> Stream;

    /// Makes `stream` current on its device. Does not change the current device.
    fn exchange_stream(&self, stream: Stream) -> Stream;

    fn device_count(&self) -> DeviceIndex;

    /// Whether all work queued on `stream` has completed.
    fn query_stream(&self, stream: &Stream) -> Result<bool>;

    fn synchronize_stream(&self, stream: &Stream) -> Result<()>;

    fn record(
        &self,
        _event: &mut Option<Event>,
        _stream: &Stream,
        _device_index: DeviceIndex,
        _flag: EventFlag,
    ) -> Result<()> {
        UnsupportedSnafu { backend: self.device_type().to_string(), capability: "events" }.fail()
    }

    fn block(&self, _event: &Event, _stream: &Stream) -> Result<()> {
        UnsupportedSnafu { backend: self.device_type().to_string(), capability: "events" }.fail()
    }

    fn query_event(&self, _event: &Event) -> Result<bool> {
        UnsupportedSnafu { backend: self.device_type().to_string(), capability: "events" }.fail()
    }

    /// Releases an event. Must never fail.
    fn destroy_event(&self, _event: Event, _device_index: DeviceIndex) {}
}

/// Guard implementation that can be constructed for a device type, which is
/// what [`InlineDeviceGuard`] needs.
pub trait InlineGuardImpl: DeviceGuardImpl + Sized {
    fn for_device_type(device_type: DeviceType) -> Result<Self>;
}

/// Guard implementation for the reference backend, which has one device and
/// no device state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuGuardImpl;

impl DeviceGuardImpl for CpuGuardImpl {
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn exchange_device(&self, device: Device) -> Result<Device> {
        assert!(device.is_cpu(), "CpuGuardImpl received a {} device", device.device_type());
        Ok(Device::cpu())
    }

    fn get_device(&self) -> Device {
        Device::cpu()
    }

    fn set_device(&self, device: Device) -> Result<()> {
        assert!(device.is_cpu(), "CpuGuardImpl received a {} device", device.device_type());
        Ok(())
    }

    fn unchecked_set_device(&self, _device: Device) {}

    fn get_stream(&self, _device: Device) -> Stream {
        Stream::default_for(Device::cpu())
    }

    fn exchange_stream(&self, _stream: Stream) -> Stream {
        Stream::default_for(Device::cpu())
    }

    fn device_count(&self) -> DeviceIndex {
        1
    }

    fn query_stream(&self, _stream: &Stream) -> Result<bool> {
        Ok(true)
    }

    fn synchronize_stream(&self, _stream: &Stream) -> Result<()> {
        Ok(())
    }
}

impl InlineGuardImpl for CpuGuardImpl {
    fn for_device_type(device_type: DeviceType) -> Result<Self> {
        assert_eq!(device_type, DeviceType::Cpu);
        Ok(Self)
    }
}

static CPU_GUARD_IMPL: CpuGuardImpl = CpuGuardImpl;

lazy_static! {
    static ref GUARD_IMPLS: RwLock<HashMap<DeviceType, &'static dyn DeviceGuardImpl>> = {
        let mut slots: HashMap<DeviceType, &'static dyn DeviceGuardImpl> = HashMap::new();
        slots.insert(DeviceType::Cpu, &CPU_GUARD_IMPL);
        RwLock::new(slots)
    };
}

/// Installs the guard implementation for `device_type`. Each slot can be
/// filled once.
pub fn register_guard_impl(
    device_type: DeviceType,
    guard_impl: &'static dyn DeviceGuardImpl,
) -> Result<()> {
    ensure!(
        guard_impl.device_type() == device_type,
        InvalidArgumentSnafu {
            op: "register_guard_impl",
            name: "guard_impl",
            reason: format!(
                "implementation is for {}, not {}",
                guard_impl.device_type(),
                device_type
            ),
        }
    );
    let mut slots = GUARD_IMPLS.write();
    ensure!(
        !slots.contains_key(&device_type),
        AlreadyRegisteredSnafu { slot: "device guard", device_type: device_type.to_string() }
    );
    slots.insert(device_type, guard_impl);
    Ok(())
}

/// Looks up the guard implementation registered for `device_type`.
pub fn guard_impl(device_type: DeviceType) -> Result<&'static dyn DeviceGuardImpl> {
    GUARD_IMPLS
        .read()
        .get(&device_type)
        .copied()
        .context(NotRegisteredSnafu { slot: "device guard", device_type: device_type.to_string() })
}

/// Restores the device active at construction when dropped.
///
/// There is deliberately no way to build a guard without naming a device:
/// a guard that only remembers the current device is almost always a bug.
pub struct InlineDeviceGuard<T: InlineGuardImpl> {
    guard_impl: T,
    original_device: Device,
    current_device: Device,
    _not_send: PhantomData<*const ()>,
}

impl<T: InlineGuardImpl> InlineDeviceGuard<T> {
    /// Makes `device` current for the lifetime of the guard.
    ///
    /// A device without an index leaves the current device untouched.
    pub fn new(device: Device) -> Result<Self> {
        let guard_impl = T::for_device_type(device.device_type())?;
        let (original_device, current_device) = if device.has_index() {
            (guard_impl.exchange_device(device)?, device)
        } else {
            let current = guard_impl.get_device();
            (current, current)
        };
        Ok(Self { guard_impl, original_device, current_device, _not_send: PhantomData })
    }

    pub fn with_index(device_type: DeviceType, index: DeviceIndex) -> Result<Self> {
        Self::new(Device::new(device_type, Some(index)))
    }

    /// Makes `device` current. The restore point stays the one captured at
    /// construction.
    ///
    /// # Panics
    /// Panics if `device` has a different device type than the guard.
    pub fn set_device(&mut self, device: Device) -> Result<()> {
        assert_eq!(
            device.device_type(),
            self.guard_impl.device_type(),
            "guard for {} cannot switch to a {} device",
            self.guard_impl.device_type(),
            device.device_type()
        );
        if !device.has_index() {
            return Ok(());
        }
        self.guard_impl.set_device(device)?;
        self.current_device = device;
        Ok(())
    }

    /// Restores the original device, then makes `device` current.
    ///
    /// If `device` has another device type, the guard switches to that type's
    /// implementation and its restore point becomes that type's current device.
    pub fn reset_device(&mut self, device: Device) -> Result<()> {
        self.guard_impl.unchecked_set_device(self.original_device);
        self.current_device = self.original_device;
        if device.device_type() == self.guard_impl.device_type() {
            return self.set_device(device);
        }

        let guard_impl = T::for_device_type(device.device_type())?;
        let original_device = if device.has_index() {
            guard_impl.exchange_device(device)?
        } else {
            guard_impl.get_device()
        };
        self.current_device = if device.has_index() { device } else { original_device };
        self.original_device = original_device;
        self.guard_impl = guard_impl;
        Ok(())
    }

    pub fn set_index(&mut self, index: DeviceIndex) -> Result<()> {
        self.set_device(Device::new(self.guard_impl.device_type(), Some(index)))
    }

    /// Device that was current when the guard was created.
    pub fn original_device(&self) -> Device {
        self.original_device
    }

    /// Device most recently made current by this guard.
    pub fn current_device(&self) -> Device {
        self.current_device
    }
}

impl<T: InlineGuardImpl> Drop for InlineDeviceGuard<T> {
    fn drop(&mut self) {
        self.guard_impl.unchecked_set_device(self.original_device);
    }
}

impl<T: InlineGuardImpl> fmt::Debug for InlineDeviceGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineDeviceGuard")
            .field("original_device", &self.original_device)
            .field("current_device", &self.current_device)
            .finish()
    }
}

/// Guard implementation resolved from the registry at runtime.
#[derive(Clone, Copy)]
pub struct VirtualGuardImpl {
    inner: &'static dyn DeviceGuardImpl,
}

impl VirtualGuardImpl {
    pub fn new(device_type: DeviceType) -> Result<Self> {
        Ok(Self { inner: guard_impl(device_type)? })
    }
}

impl fmt::Debug for VirtualGuardImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VirtualGuardImpl").field(&self.inner.device_type()).finish()
    }
}

impl DeviceGuardImpl for VirtualGuardImpl {
    fn device_type(&self) -> DeviceType {
        self.inner.device_type()
    }

    fn exchange_device(&self, device: Device) -> Result<Device> {
        self.inner.exchange_device(device)
    }

    fn get_device(&self) -> Device {
        self.inner.get_device()
    }

    fn set_device(&self, device: Device) -> Result<()> {
        self.inner.set_device(device)
    }

    fn unchecked_set_device(&self, device: Device) {
        self.inner.unchecked_set_device(device)
    }

    fn get_stream(&self, device: Device) -> Stream {
        self.inner.get_stream(device)
    }

    fn exchange_stream(&self, stream: Stream) -> Stream {
        self.inner.exchange_stream(stream)
    }

    fn device_count(&self) -> DeviceIndex {
        self.inner.device_count()
    }

    fn query_stream(&self, stream: &Stream) -> Result<bool> {
        self.inner.query_stream(stream)
    }

    fn synchronize_stream(&self, stream: &Stream) -> Result<()> {
        self.inner.synchronize_stream(stream)
    }

    fn record(
        &self,
        event: &mut Option<Event>,
        stream: &Stream,
        device_index: DeviceIndex,
        flag: EventFlag,
    ) -> Result<()> {
        self.inner.record(event, stream, device_index, flag)
    }

    fn block(&self, event: &Event, stream: &Stream) -> Result<()> {
        self.inner.block(event, stream)
    }

    fn query_event(&self, event: &Event) -> Result<bool> {
        self.inner.query_event(event)
    }

    fn destroy_event(&self, event: Event, device_index: DeviceIndex) {
        self.inner.destroy_event(event, device_index)
    }
}

impl InlineGuardImpl for VirtualGuardImpl {
    fn for_device_type(device_type: DeviceType) -> Result<Self> {
        Self::new(device_type)
    }
}

/// Device guard for any registered device type.
pub type DeviceGuard = InlineDeviceGuard<VirtualGuardImpl>;

/// A [`DeviceGuard`] that may not be engaged.
#[derive(Debug)]
pub struct OptionalDeviceGuard {
    guard: Option<DeviceGuard>,
}

impl OptionalDeviceGuard {
    /// Engages a guard for `device`, if there is one.
    pub fn new(device: Option<Device>) -> Result<Self> {
        Ok(Self { guard: device.map(DeviceGuard::new).transpose()? })
    }

    pub fn is_engaged(&self) -> bool {
        self.guard.is_some()
    }

    pub fn original_device(&self) -> Option<Device> {
        self.guard.as_ref().map(DeviceGuard::original_device)
    }

    pub fn current_device(&self) -> Option<Device> {
        self.guard.as_ref().map(DeviceGuard::current_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_slot_is_prefilled() {
        let cpu = guard_impl(DeviceType::Cpu).unwrap();
        assert_eq!(cpu.device_count(), 1);
        assert!(register_guard_impl(DeviceType::Cpu, &CPU_GUARD_IMPL).is_err());
    }

    #[test]
    fn cpu_guard_is_a_no_op() {
        let guard = DeviceGuard::new(Device::cpu()).unwrap();
        assert_eq!(guard.original_device(), Device::cpu());
        assert_eq!(guard.current_device(), Device::cpu());
    }

    #[test]
    fn mismatched_registration_is_rejected() {
        assert!(register_guard_impl(DeviceType::PrivateUse1, &CPU_GUARD_IMPL).is_err());
    }

    #[test]
    fn default_events_are_unsupported() {
        let cpu = CpuGuardImpl;
        let stream = cpu.get_stream(Device::cpu());
        let mut event = None;
        assert!(cpu.record(&mut event, &stream, 0, EventFlag::Default).is_err());
        assert!(cpu.query_event(&Event::from_raw(1)).is_err());
        cpu.destroy_event(Event::from_raw(1), 0);
    }

    #[test]
    fn disengaged_optional_guard() {
        let guard = OptionalDeviceGuard::new(None).unwrap();
        assert!(!guard.is_engaged());
        assert_eq!(guard.original_device(), None);
    }
}
