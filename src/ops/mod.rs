//! # Operator Layer
//!
//! Every tensor operation is routed through a [`Dispatcher`](dispatch::Dispatcher),
//! which picks a kernel from the dispatch keys of the arguments.
//!
//! ## Submodules
//!
//! - [`ivalue`] - boxed calling convention (`IValue`, `Stack`)
//! - [`dispatch`] - kernel tables, fallbacks and the process-wide dispatcher
//! - [`cpu`] - reference kernels, registered under the `CPU` key
//! - [`fallback`] - generic "run it on the CPU" primitive for other backends
//!
//! The functions in this module are typed front ends: they box their
//! arguments, call the global dispatcher, and unbox the result.
//!
//! Example:
//! ```rust
//! use foo_backend::{ops, tensor};
//!
//! let a = tensor!([1.0, 2.0, 3.0]);
//! let b = tensor!([10.0, 20.0, 30.0]);
//! let c = ops::add(&a, &b).unwrap();
//! assert_eq!(c.to_vec::<f64>().unwrap(), vec![11.0, 22.0, 33.0]);
//! ```
//!
//! ## Notes
//!
//! - No broadcasting: binary operands must have identical shapes
//! - In-place operators return the tensor they mutated

pub mod cpu;
pub mod dispatch;
pub mod fallback;
pub mod ivalue;

use dispatch::dispatcher;
use ivalue::{IValue, Stack, push_tensor_options};

use crate::error::Result;
use crate::tensors::{Scalar, Tensor, TensorOptions};

/// Allocates a tensor with unspecified contents on `options`' device.
pub fn empty(size: &[usize], options: &TensorOptions) -> Result<Tensor> {
    let mut stack: Stack = vec![size.into()];
    push_tensor_options(&mut stack, options);
    stack.push(options.memory_format_opt().into());
    dispatcher().call_tensor("empty.memory_format", stack)
}

pub fn empty_strided(size: &[usize], stride: &[usize], options: &TensorOptions) -> Result<Tensor> {
    let mut stack: Stack = vec![size.into(), stride.into()];
    push_tensor_options(&mut stack, options);
    dispatcher().call_tensor("empty_strided", stack)
}

/// Copies `src` into `dst` and returns `dst`.
pub fn copy_(dst: &Tensor, src: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("copy_", vec![dst.into(), src.into(), IValue::Bool(false)])
}

/// Copies `t` into a new tensor with the requested device and dtype.
///
/// Always copies, even when nothing changes.
pub fn to(t: &Tensor, options: &TensorOptions) -> Result<Tensor> {
    let mut stack: Stack = vec![t.into()];
    push_tensor_options(&mut stack, options);
    stack.push(IValue::Bool(false));
    stack.push(options.memory_format_opt().into());
    dispatcher().call_tensor("_to_copy", stack)
}

pub fn fill_(t: &Tensor, value: impl Into<Scalar>) -> Result<Tensor> {
    dispatcher().call_tensor("fill_.Scalar", vec![t.into(), IValue::Scalar(value.into())])
}

/// `a + b`.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    add_scaled(a, b, Scalar::Int(1))
}

/// `a + alpha * b`.
pub fn add_scaled(a: &Tensor, b: &Tensor, alpha: impl Into<Scalar>) -> Result<Tensor> {
    dispatcher().call_tensor("add.Tensor", vec![a.into(), b.into(), IValue::Scalar(alpha.into())])
}

/// `a - b`.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("sub.Tensor", vec![a.into(), b.into(), Scalar::Int(1).into()])
}

pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("mul.Tensor", vec![a.into(), b.into()])
}

/// In-place `a *= b`; returns `a`.
pub fn mul_(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("mul_.Tensor", vec![a.into(), b.into()])
}

pub fn neg(t: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("neg", vec![t.into()])
}

pub fn relu(t: &Tensor) -> Result<Tensor> {
    dispatcher().call_tensor("relu", vec![t.into()])
}
