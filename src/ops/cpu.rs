//! Parallel CPU reference kernels
//!
//! # CPU Backend
//!
//! This module provides the reference implementation of every operator the
//! runtime knows about. Other backends either override an operator with
//! their own kernel or reach these through the CPU fallback.
//!
//! Each kernel exists in two forms:
//!
//! - a typed function (`add`, `copy_`, ...) that other backends may call
//!   directly, and
//! - a boxed wrapper registered into the dispatcher under the `CPU` key by
//!   [`reference_kernels`].
//!
//! ## Implemented Ops
//!
//! - `empty.memory_format`, `empty_strided`: allocation
//! - `copy_`: strided, dtype-casting elementwise copy
//! - `_to_copy`: conversion onto the CPU
//! - `fill_.Scalar`: scalar broadcast
//! - `add.Tensor`, `sub.Tensor`, `mul.Tensor`, `mul_.Tensor`, `neg`, `relu`
//!
//! ## Design Goals
//!
//! - Parallel elementwise loops using [`rayon`](https://docs.rs/rayon)
//! - No broadcasting: binary operands must have identical shapes
//! - Kernels read strided inputs and always produce contiguous outputs

use std::sync::Arc;

use rayon::prelude::*;
use snafu::ensure;

use super::dispatch::{BoxedKernel, OperatorHandle};
use super::ivalue::{Args, Stack};
use crate::alloc::{Allocator, CPU_ALLOCATOR};
use crate::backend::Device;
use crate::error::{
    DTypeMismatchSnafu, Result, ShapeMismatchSnafu, UnsupportedSnafu, WrongDeviceSnafu,
};
use crate::tensors::{
    Element, Layout, MemoryFormat, Scalar, Tensor, TensorOptions, device_or_default, dispatch_dtype,
    dtype_or_default, empty_generic, empty_strided_generic, layout_or_default,
};

fn check_cpu_options(op: &str, options: &TensorOptions) -> Result<()> {
    let device = device_or_default(options.device_opt());
    ensure!(
        device.is_cpu(),
        UnsupportedSnafu { backend: "cpu", capability: format!("{op} on {device}") }
    );
    ensure!(
        layout_or_default(options.layout_opt()) == Layout::Strided,
        UnsupportedSnafu { backend: "cpu", capability: "sparse layout" }
    );
    Ok(())
}

/// Allocates a CPU tensor.
pub fn empty(
    size: &[usize],
    options: &TensorOptions,
    memory_format: Option<MemoryFormat>,
) -> Result<Tensor> {
    check_cpu_options("empty", options)?;
    empty_generic(size, &CPU_ALLOCATOR, dtype_or_default(options.dtype_opt()), memory_format)
}

/// Allocates a CPU tensor with explicit strides.
pub fn empty_strided(size: &[usize], stride: &[usize], options: &TensorOptions) -> Result<Tensor> {
    check_cpu_options("empty_strided", options)?;
    empty_strided_generic(size, stride, &CPU_ALLOCATOR, dtype_or_default(options.dtype_opt()))
}

/// Copies `src` into `dst` element by element, casting between dtypes.
///
/// Works for any pair of host-addressable tensors regardless of device tag.
/// `src` is read in full before `dst` is written, so overlapping views are fine.
pub fn copy_(dst: &Tensor, src: &Tensor) -> Result<()> {
    ensure!(
        dst.shape() == src.shape(),
        ShapeMismatchSnafu { expected: dst.shape().to_vec(), actual: src.shape().to_vec() }
    );
    if dst.numel() == 0 {
        return Ok(());
    }

    if dst.dtype() == src.dtype() {
        return dst.write_bytes(&src.to_bytes()?);
    }

    let values: Vec<f64> = dispatch_dtype!(src.dtype(), |S| {
        src.to_vec::<S>()?.into_par_iter().map(Element::to_f64).collect()
    });
    dispatch_dtype!(dst.dtype(), |D| {
        let cast: Vec<D> = values.into_par_iter().map(D::from_f64).collect();
        dst.write_slice(&cast)
    })
}

/// Converts `src` to a new CPU tensor.
///
/// Unset options keep the source's dtype. The result is contiguous unless
/// `channels_last` is requested.
pub fn to_copy(
    src: &Tensor,
    options: &TensorOptions,
    memory_format: Option<MemoryFormat>,
) -> Result<Tensor> {
    let device = options.device_opt().unwrap_or(src.device());
    ensure!(
        device.is_cpu(),
        UnsupportedSnafu {
            backend: "cpu",
            capability: format!("_to_copy from {} to {device}", src.device()),
        }
    );
    let options = options.device(Device::cpu());
    check_cpu_options("_to_copy", &options)?;

    let format = match memory_format {
        Some(MemoryFormat::ChannelsLast) => Some(MemoryFormat::ChannelsLast),
        _ => None,
    };
    let dtype = options.dtype_opt().unwrap_or(src.dtype());
    let out = empty_generic(src.shape(), &CPU_ALLOCATOR, dtype, format)?;
    copy_(&out, src)?;
    Ok(out)
}

/// Overwrites every element of `t` with `value`.
pub fn fill_(t: &Tensor, value: Scalar) -> Result<()> {
    dispatch_dtype!(t.dtype(), |T| {
        let v: T = value.cast();
        t.write_slice(&vec![v; t.numel()])
    })
}

/// Rejects operand pairs that differ in shape, device or dtype.
pub fn check_binary(op: &str, a: &Tensor, b: &Tensor) -> Result<()> {
    ensure!(
        a.shape() == b.shape(),
        ShapeMismatchSnafu { expected: a.shape().to_vec(), actual: b.shape().to_vec() }
    );
    ensure!(
        a.device() == b.device(),
        WrongDeviceSnafu { op, expected: a.device().to_string(), actual: b.device().to_string() }
    );
    ensure!(a.dtype() == b.dtype(), DTypeMismatchSnafu { expected: a.dtype(), actual: b.dtype() });
    Ok(())
}

fn zip_values<T, F>(a: &Tensor, b: &Tensor, f: F) -> Result<Vec<T>>
where
    T: Element,
    F: Fn(T, T) -> T + Send + Sync,
{
    let lhs = a.to_vec::<T>()?;
    let rhs = b.to_vec::<T>()?;
    Ok(lhs.into_par_iter().zip(rhs.into_par_iter()).map(|(x, y)| f(x, y)).collect())
}

fn map_values<T, F>(a: &Tensor, f: F) -> Result<Vec<T>>
where
    T: Element,
    F: Fn(T) -> T + Send + Sync,
{
    Ok(a.to_vec::<T>()?.into_par_iter().map(f).collect())
}

fn from_values<T: Element>(
    shape: &[usize],
    values: &[T],
    allocator: &'static dyn Allocator,
) -> Result<Tensor> {
    let out = empty_generic(shape, allocator, T::DTYPE, None)?;
    out.write_slice(values)?;
    Ok(out)
}

/// `a + alpha * b` into a contiguous tensor from `allocator`.
///
/// Operands must already have passed [`check_binary`].
pub fn add_into(
    a: &Tensor,
    b: &Tensor,
    alpha: Scalar,
    allocator: &'static dyn Allocator,
) -> Result<Tensor> {
    dispatch_dtype!(a.dtype(), |T| {
        let alpha: T = alpha.cast();
        let values =
            zip_values::<T, _>(a, b, move |x, y| x.wrapping_add(alpha.wrapping_mul(y)))?;
        from_values(a.shape(), &values, allocator)
    })
}

pub fn add(a: &Tensor, b: &Tensor, alpha: Scalar) -> Result<Tensor> {
    check_binary("add.Tensor", a, b)?;
    add_into(a, b, alpha, &CPU_ALLOCATOR)
}

pub fn sub(a: &Tensor, b: &Tensor, alpha: Scalar) -> Result<Tensor> {
    check_binary("sub.Tensor", a, b)?;
    dispatch_dtype!(a.dtype(), |T| {
        let alpha: T = alpha.cast();
        let values =
            zip_values::<T, _>(a, b, move |x, y| x.wrapping_sub(alpha.wrapping_mul(y)))?;
        from_values(a.shape(), &values, &CPU_ALLOCATOR)
    })
}

pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_binary("mul.Tensor", a, b)?;
    dispatch_dtype!(a.dtype(), |T| {
        let values = zip_values::<T, _>(a, b, |x: T, y| x.wrapping_mul(y))?;
        from_values(a.shape(), &values, &CPU_ALLOCATOR)
    })
}

/// In-place `a *= b`.
pub fn mul_(a: &Tensor, b: &Tensor) -> Result<()> {
    check_binary("mul_.Tensor", a, b)?;
    dispatch_dtype!(a.dtype(), |T| {
        let values = zip_values::<T, _>(a, b, |x: T, y| x.wrapping_mul(y))?;
        a.write_slice(&values)
    })
}

pub fn neg(a: &Tensor) -> Result<Tensor> {
    dispatch_dtype!(a.dtype(), |T| {
        let values = map_values::<T, _>(a, Element::negate)?;
        from_values(a.shape(), &values, &CPU_ALLOCATOR)
    })
}

/// Elementwise `max(x, 0)`.
pub fn relu(a: &Tensor) -> Result<Tensor> {
    dispatch_dtype!(a.dtype(), |T| {
        let zero = T::from_i64(0);
        let values = map_values::<T, _>(a, move |x| if x > zero { x } else { zero })?;
        from_values(a.shape(), &values, &CPU_ALLOCATOR)
    })
}

fn boxed_empty(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let size: Vec<usize> = args.next("size")?;
    let options = args.tensor_options()?;
    let memory_format: Option<MemoryFormat> = args.next("memory_format")?;
    stack.push(empty(&size, &options, memory_format)?.into());
    Ok(())
}

fn boxed_empty_strided(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let size: Vec<usize> = args.next("size")?;
    let stride: Vec<usize> = args.next("stride")?;
    let options = args.tensor_options()?;
    stack.push(empty_strided(&size, &stride, &options)?.into());
    Ok(())
}

fn boxed_copy(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let dst: Tensor = args.next("self")?;
    let src: Tensor = args.next("src")?;
    let _non_blocking: Option<bool> = args.next("non_blocking")?;
    copy_(&dst, &src)?;
    stack.push(dst.into());
    Ok(())
}

fn boxed_to_copy(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let src: Tensor = args.next("self")?;
    let options = args.tensor_options()?;
    let _non_blocking: Option<bool> = args.next("non_blocking")?;
    let memory_format: Option<MemoryFormat> = args.next("memory_format")?;
    stack.push(to_copy(&src, &options, memory_format)?.into());
    Ok(())
}

fn boxed_fill(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let t: Tensor = args.next("self")?;
    let value: Scalar = args.next("value")?;
    fill_(&t, value)?;
    stack.push(t.into());
    Ok(())
}

fn boxed_add(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    let b: Tensor = args.next("other")?;
    let alpha: Option<Scalar> = args.next("alpha")?;
    stack.push(add(&a, &b, alpha.unwrap_or(Scalar::Int(1)))?.into());
    Ok(())
}

fn boxed_sub(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    let b: Tensor = args.next("other")?;
    let alpha: Option<Scalar> = args.next("alpha")?;
    stack.push(sub(&a, &b, alpha.unwrap_or(Scalar::Int(1)))?.into());
    Ok(())
}

fn boxed_mul(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    let b: Tensor = args.next("other")?;
    stack.push(mul(&a, &b)?.into());
    Ok(())
}

fn boxed_mul_(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    let b: Tensor = args.next("other")?;
    mul_(&a, &b)?;
    stack.push(a.into());
    Ok(())
}

fn boxed_neg(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    stack.push(neg(&a)?.into());
    Ok(())
}

fn boxed_relu(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let a: Tensor = args.next("self")?;
    stack.push(relu(&a)?.into());
    Ok(())
}

fn kernel<F>(f: F) -> BoxedKernel
where
    F: Fn(&OperatorHandle<'_>, &mut Stack) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Boxed kernels for the `CPU` dispatch key, by operator name.
pub fn reference_kernels() -> Vec<(&'static str, BoxedKernel)> {
    vec![
        ("empty.memory_format", kernel(boxed_empty)),
        ("empty_strided", kernel(boxed_empty_strided)),
        ("copy_", kernel(boxed_copy)),
        ("_to_copy", kernel(boxed_to_copy)),
        ("fill_.Scalar", kernel(boxed_fill)),
        ("add.Tensor", kernel(boxed_add)),
        ("sub.Tensor", kernel(boxed_sub)),
        ("mul.Tensor", kernel(boxed_mul)),
        ("mul_.Tensor", kernel(boxed_mul_)),
        ("neg", kernel(boxed_neg)),
        ("relu", kernel(boxed_relu)),
    ]
}
