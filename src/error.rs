//! Error types shared by the runtime surface and the `foo` plugin.

use snafu::Snafu;

use crate::backend::{DeviceIndex, DispatchKey};
use crate::tensors::DType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device index is outside `[0, device_count)`.
    #[snafu(display("device index {index} does not exist on {backend} (device count {count})"))]
    InvalidDeviceIndex { backend: String, index: DeviceIndex, count: DeviceIndex },

    /// An explicit device index was required but the device carries none.
    #[snafu(display("{backend} device requires an explicit index here"))]
    MissingDeviceIndex { backend: String },

    /// The backend does not implement a capability at all.
    #[snafu(display("{backend} backend doesn't support {capability}"))]
    Unsupported { backend: String, capability: String },

    #[snafu(display("{op}: expected a tensor on {expected}, got {actual}"))]
    WrongDevice { op: String, expected: String, actual: String },

    #[snafu(display("shape mismatch: expected {expected:?}, got {actual:?}"))]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[snafu(display("dtype mismatch: expected {expected}, got {actual}"))]
    DTypeMismatch { expected: DType, actual: DType },

    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    #[snafu(display("{op}: tensor must be contiguous"))]
    NotContiguous { op: String },

    /// Two kernels were registered for the same operator and dispatch key.
    #[snafu(display("operator '{op}' already has a kernel registered for {key}"))]
    DuplicateKernel { op: String, key: DispatchKey },

    #[snafu(display("a fallback kernel is already registered for {key}"))]
    DuplicateFallback { key: DispatchKey },

    #[snafu(display("{slot} for {device_type} is already registered"))]
    AlreadyRegistered { slot: &'static str, device_type: String },

    #[snafu(display("no {slot} registered for {device_type}"))]
    NotRegistered { slot: &'static str, device_type: String },

    /// Neither a kernel nor a fallback exists for the call.
    #[snafu(display("could not run '{op}' with arguments from the '{key}' backend"))]
    NotImplemented { op: String, key: DispatchKey },

    #[snafu(display(
        "backend already registered as '{existing}', cannot rename it to '{requested}'"
    ))]
    BackendRenamed { existing: String, requested: String },

    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    #[snafu(display("invalid backend configuration: {reason}"))]
    InvalidConfig { reason: String },

    #[snafu(display("backend is already initialized with a different configuration"))]
    AlreadyInitialized,

    #[snafu(display("failed to allocate {nbytes} bytes"))]
    AllocationFailed { nbytes: usize },

    /// A boxed call received an argument of the wrong kind.
    #[snafu(display("{op}: invalid argument '{name}': {reason}"))]
    InvalidArgument { op: String, name: String, reason: String },
}
