//! Plugin configuration.

use snafu::ensure;

use crate::backend::DeviceIndex;
use crate::error::{InvalidConfigSnafu, Result};

pub const DEFAULT_NAME: &str = "foo";
pub const DEFAULT_DEVICE_COUNT: DeviceIndex = 2;

/// How the plugin presents itself to the runtime.
///
/// ```
/// use foo_backend::config::BackendConfig;
/// let config = BackendConfig::default().with_device_count(4);
/// assert_eq!(config.name(), "foo");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    name: String,
    device_count: DeviceIndex,
    report_allocations: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            device_count: DEFAULT_DEVICE_COUNT,
            report_allocations: true,
        }
    }
}

impl BackendConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_device_count(mut self, device_count: DeviceIndex) -> Self {
        self.device_count = device_count;
        self
    }

    /// Whether the allocator reports `Allocate`/`Free` diagnostics.
    pub fn with_report_allocations(mut self, report_allocations: bool) -> Self {
        self.report_allocations = report_allocations;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_count(&self) -> DeviceIndex {
        self.device_count
    }

    pub fn report_allocations(&self) -> bool {
        self.report_allocations
    }

    /// Checks that the name can be used in device strings and that at least
    /// one device exists.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), InvalidConfigSnafu { reason: "backend name is empty" });
        ensure!(
            self.name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
            InvalidConfigSnafu {
                reason: format!(
                    "backend name '{}' must be lowercase ASCII letters, digits or '_'",
                    self.name
                ),
            }
        );
        ensure!(
            self.name != "cpu",
            InvalidConfigSnafu { reason: "backend name 'cpu' is reserved" }
        );
        ensure!(
            self.device_count >= 1,
            InvalidConfigSnafu { reason: "device count must be at least 1" }
        );
        Ok(())
    }
}
