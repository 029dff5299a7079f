//! Device identity module.
//!
//! This module defines the device types known to the runtime, the dispatch
//! keys operators are routed by, and the one-time registration of the name
//! under which the out-of-tree backend is presented to users.
//!
//! # Supported Device Types
//!
//! - `Cpu`: the reference backend; every operator has a kernel here.
//! - `PrivateUse1`: the pluggable slot an out-of-tree backend claims by
//!   registering a name (e.g. `"foo"`).
//!
//! # Naming
//!
//! Until [`register_backend_name`] is called, `PrivateUse1` displays as
//! `privateuseone`. Afterwards devices print and parse with the registered
//! name, so `"foo:1"` round-trips through [`Device::parse`].

use core::convert::TryFrom;
use core::fmt;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use snafu::ensure;

use crate::error::{BackendRenamedSnafu, Error, InvalidDeviceSnafu, Result};

/// Index of a device within one device type.
pub type DeviceIndex = u8;

const DEFAULT_PRIVATEUSE1_NAME: &str = "privateuseone";

/// Enumeration of device types the runtime can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum DeviceType {
    /// Host reference backend (default).
    #[default]
    Cpu = 0,
    /// Open registration slot for an out-of-tree backend.
    PrivateUse1 = 1,
}

impl TryFrom<u8> for DeviceType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::PrivateUse1),
            _ => Err(()),
        }
    }
}

impl DeviceType {
    /// Dispatch key operators on this device type are routed by.
    pub const fn dispatch_key(self) -> DispatchKey {
        match self {
            Self::Cpu => DispatchKey::Cpu,
            Self::PrivateUse1 => DispatchKey::PrivateUse1,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::PrivateUse1 => f.write_str(&backend_name()),
        }
    }
}

/// Operator dispatch key.
///
/// When a call carries arguments from several backends, the key with the
/// highest priority wins; `PrivateUse1` outranks `Cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DispatchKey {
    Cpu,
    PrivateUse1,
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("CPU"),
            Self::PrivateUse1 => f.write_str("PrivateUse1"),
        }
    }
}

/// A device: a type plus an optional index.
///
/// An index of `None` means "whichever device of this type is current".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    device_type: DeviceType,
    index: Option<DeviceIndex>,
}

impl Device {
    pub const fn new(device_type: DeviceType, index: Option<DeviceIndex>) -> Self {
        Self { device_type, index }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceType::Cpu, None)
    }

    /// A `PrivateUse1` device with the given index.
    pub const fn privateuse1(index: DeviceIndex) -> Self {
        Self::new(DeviceType::PrivateUse1, Some(index))
    }

    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub const fn index(&self) -> Option<DeviceIndex> {
        self.index
    }

    pub const fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn is_cpu(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }

    pub fn is_privateuse1(&self) -> bool {
        self.device_type == DeviceType::PrivateUse1
    }

    /// Parses `"cpu"`, `"<name>"` or `"<name>:<index>"`.
    ///
    /// `<name>` is the registered backend name (or `privateuseone`).
    ///
    /// # Example
    /// ```
    /// use foo_backend::backend::{Device, DeviceType};
    /// let d = Device::parse("privateuseone:1").unwrap();
    /// assert_eq!(d.device_type(), DeviceType::PrivateUse1);
    /// assert_eq!(d.index(), Some(1));
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || InvalidDeviceSnafu { device: s }.build();
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => {
                (kind, Some(index.parse::<DeviceIndex>().map_err(|_| invalid())?))
            }
            None => (s, None),
        };

        let device_type = if kind == "cpu" {
            DeviceType::Cpu
        } else if kind == backend_name() || kind == DEFAULT_PRIVATEUSE1_NAME {
            DeviceType::PrivateUse1
        } else {
            return Err(invalid());
        };

        if device_type == DeviceType::Cpu && index.is_some_and(|i| i != 0) {
            return Err(invalid());
        }
        Ok(Self::new(device_type, index))
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.device_type, index),
            None => write!(f, "{}", self.device_type),
        }
    }
}

impl core::str::FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

lazy_static! {
    /// Registered name of the `PrivateUse1` backend, set at most once.
    static ref PRIVATEUSE1_NAME: RwLock<Option<String>> = RwLock::new(None);
}

/// Declares that a backend named `name` occupies the `PrivateUse1` slot.
///
/// Registering the same name again is a no-op. Registering a different name
/// fails: the backend identity is fixed for the process lifetime.
pub fn register_backend_name(name: &str) -> Result<()> {
    let mut slot = PRIVATEUSE1_NAME.write();
    if let Some(existing) = slot.as_deref() {
        ensure!(existing == name, BackendRenamedSnafu { existing, requested: name });
        return Ok(());
    }
    *slot = Some(name.to_owned());
    Ok(())
}

/// Returns the registered `PrivateUse1` name, or `privateuseone` if none.
pub fn backend_name() -> String {
    PRIVATEUSE1_NAME
        .read()
        .clone()
        .unwrap_or_else(|| DEFAULT_PRIVATEUSE1_NAME.to_owned())
}
