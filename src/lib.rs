//! foo_backend: an out-of-tree device backend for a dispatching tensor runtime.
//!
//! The crate carries a small host runtime (devices, tensors, allocators,
//! device guards, a boxed operator dispatcher with CPU reference kernels) and
//! the `foo` plugin that extends it with a new device type without touching
//! any of the host code.
//!
//! # Features
//!
//! - Thread-local active device with RAII guards that restore on unwind.
//! - Per-device-type allocator slot; `foo` memory is host memory tagged `foo:N`.
//! - Per-(operator, dispatch key) kernel table with per-key fallbacks.
//! - Warn-once CPU fallback for every operator `foo` does not implement.
//!
//! # Modules
//!
//! - [`backend`] - device types, dispatch keys, backend naming.
//! - [`tensors`] - storage, strided tensors and dtypes.
//! - [`alloc`] - raw allocations and the allocator registry.
//! - [`guard`] - device guard traits, registry and RAII guards.
//! - [`ops`] - dispatcher, reference kernels and typed operator front ends.
//! - [`foo`] - the plugin itself.
//! - [`diagnostics`] - pluggable event sink, `tracing` by default.
//!
//! # Example
//!
//! ```rust
//! use foo_backend::backend::Device;
//! use foo_backend::{ops, tensor};
//!
//! foo_backend::initialize().unwrap();
//! let foo0: Device = "foo:0".parse().unwrap();
//!
//! let x = tensor!([1.0, 2.0, 3.0]).to_device(foo0).unwrap();
//! let y = tensor!([10.0, 20.0, 30.0]).to_device(foo0).unwrap();
//! let z = ops::add(&x, &y).unwrap();
//! let back = z.to_device(Device::cpu()).unwrap();
//! assert_eq!(back.to_vec::<f64>().unwrap(), vec![11.0, 22.0, 33.0]);
//!
//! // No `foo` kernel for `neg`: runs on the CPU and comes back to foo:0.
//! let n = ops::neg(&x).unwrap();
//! assert_eq!(n.device(), foo0);
//! ```

pub mod alloc;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod foo;
pub mod guard;
pub mod ops;
pub mod tensors;

pub use error::{Error, Result};
pub use foo::{initialize, initialize_with};
