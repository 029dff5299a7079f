//! `foo` operator overrides.
//!
//! Every kernel here runs with the device of its `foo` operand made current
//! through [`FooDeviceGuard`], so allocations land on that device. Storage is
//! host memory, which lets the kernels reuse the CPU reference routines for
//! the actual element work.
//!
//! | operator              | behaviour                                              |
//! |-----------------------|--------------------------------------------------------|
//! | `empty.memory_format` | strided layout only, pinned memory rejected            |
//! | `empty_strided`       | same checks as `empty`                                 |
//! | `copy_`               | destination must be `foo`; empty destination is a no-op |
//! | `_to_copy`            | `foo -> cpu` and `cpu -> foo` only                     |
//! | `_copy_from`          | contiguous same-dtype raw copy between cpu and `foo`   |
//! | `fill_.Scalar`        | writes every element                                   |
//! | `add.Tensor`          | `self + alpha * other`, identical shapes               |

use snafu::ensure;

use crate::alloc::{Allocator, get_allocator};
use crate::backend::{Device, DeviceType, DispatchKey, backend_name};
use crate::diagnostics::{Diagnostic, report};
use crate::error::{
    DTypeMismatchSnafu, NotContiguousSnafu, Result, ShapeMismatchSnafu, UnsupportedSnafu,
    WrongDeviceSnafu,
};
use crate::ops::cpu;
use crate::ops::dispatch::{Dispatcher, OperatorHandle};
use crate::ops::ivalue::{Args, Stack};
use crate::tensors::{
    Layout, MemoryFormat, Scalar, Tensor, TensorOptions, device_or_default, dtype_or_default,
    empty_generic, empty_strided_generic, layout_or_default, pinned_memory_or_default,
};

use super::guard::FooDeviceGuard;

fn allocator() -> Result<&'static dyn Allocator> {
    get_allocator(DeviceType::PrivateUse1)
}

fn ensure_foo(op: &str, device: Device) -> Result<()> {
    ensure!(
        device.is_privateuse1(),
        WrongDeviceSnafu { op, expected: backend_name(), actual: device.to_string() }
    );
    Ok(())
}

/// Device a construction kernel allocates on, after checking what `foo`
/// supports.
fn construction_device(op: &str, options: &TensorOptions) -> Result<Device> {
    ensure!(
        layout_or_default(options.layout_opt()) == Layout::Strided,
        UnsupportedSnafu { backend: backend_name(), capability: "non-strided layouts" }
    );
    ensure!(
        !pinned_memory_or_default(options.pin_memory_opt()),
        UnsupportedSnafu {
            backend: backend_name(),
            capability: "pinned memory (only meaningful on cpu)",
        }
    );
    let device = device_or_default(options.device_opt());
    ensure_foo(op, device)?;
    Ok(device)
}

pub fn empty(
    size: &[usize],
    options: &TensorOptions,
    memory_format: Option<MemoryFormat>,
) -> Result<Tensor> {
    let device = construction_device("empty.memory_format", options)?;
    let _guard = FooDeviceGuard::new(device)?;
    report(Diagnostic::KernelCalled { op: "empty.memory_format", device });
    empty_generic(size, allocator()?, dtype_or_default(options.dtype_opt()), memory_format)
}

pub fn empty_strided(size: &[usize], stride: &[usize], options: &TensorOptions) -> Result<Tensor> {
    let device = construction_device("empty_strided", options)?;
    let _guard = FooDeviceGuard::new(device)?;
    report(Diagnostic::KernelCalled { op: "empty_strided", device });
    empty_strided_generic(size, stride, allocator()?, dtype_or_default(options.dtype_opt()))
}

/// Copies `src` (from any host-addressable backend) into the `foo` tensor
/// `dst`.
pub fn copy_(dst: &Tensor, src: &Tensor) -> Result<()> {
    ensure_foo("copy_", dst.device())?;
    let _guard = FooDeviceGuard::new(dst.device())?;
    report(Diagnostic::KernelCalled { op: "copy_", device: dst.device() });
    if dst.numel() == 0 {
        return Ok(());
    }
    cpu::copy_(dst, src)
}

/// Moves `src` between `foo` and the CPU, converting dtype on the way.
pub fn to_copy(
    src: &Tensor,
    options: &TensorOptions,
    memory_format: Option<MemoryFormat>,
) -> Result<Tensor> {
    let target = options.device_opt().unwrap_or(src.device());
    report(Diagnostic::KernelCalled { op: "_to_copy", device: src.device() });

    match (src.device().device_type(), target.device_type()) {
        (DeviceType::PrivateUse1, DeviceType::Cpu) => {
            let _guard = FooDeviceGuard::new(src.device())?;
            cpu::to_copy(src, options, memory_format)
        }
        (DeviceType::Cpu, DeviceType::PrivateUse1) => {
            let staged = cpu::to_copy(src, &options.device(Device::cpu()), memory_format)?;
            let foo_options = TensorOptions::new().dtype(staged.dtype()).device(target);
            let out = empty_strided(staged.shape(), staged.strides(), &foo_options)?;

            {
                let from = staged.storage().data();
                let mut to = out.storage().data_mut();
                allocator()?.copy_data(to.as_bytes_mut(), from.as_bytes(), from.nbytes())?;
            }
            Ok(out)
        }
        _ => UnsupportedSnafu {
            backend: backend_name(),
            capability: format!("_to_copy from {} to {target}", src.device()),
        }
        .fail(),
    }
}

/// Raw copy of `src` into `dst`, where each side is either cpu or `foo`.
///
/// Both tensors must have the same shape and dtype and be contiguous.
pub fn copy_from(src: &Tensor, dst: &Tensor) -> Result<()> {
    for t in [src, dst] {
        ensure!(
            t.device().is_cpu() || t.device().is_privateuse1(),
            UnsupportedSnafu {
                backend: backend_name(),
                capability: format!("_copy_from with a {} tensor", t.device()),
            }
        );
        ensure!(t.is_contiguous(), NotContiguousSnafu { op: "_copy_from" });
    }
    ensure!(
        src.shape() == dst.shape(),
        ShapeMismatchSnafu { expected: dst.shape().to_vec(), actual: src.shape().to_vec() }
    );
    ensure!(
        src.dtype() == dst.dtype(),
        DTypeMismatchSnafu { expected: dst.dtype(), actual: src.dtype() }
    );

    let foo_side = if src.device().is_privateuse1() { src.device() } else { dst.device() };
    let _guard =
        if foo_side.is_privateuse1() { Some(FooDeviceGuard::new(foo_side)?) } else { None };
    report(Diagnostic::KernelCalled { op: "_copy_from", device: foo_side });

    let bytes = src.to_bytes()?;
    let start = dst.storage_offset() * dst.dtype().itemsize();
    let mut data = dst.storage().data_mut();
    let dest = data.as_bytes_mut().get_mut(start..).unwrap_or_default();
    allocator()?.copy_data(dest, &bytes, bytes.len())
}

pub fn fill_(t: &Tensor, value: Scalar) -> Result<()> {
    ensure_foo("fill_.Scalar", t.device())?;
    let _guard = FooDeviceGuard::new(t.device())?;
    report(Diagnostic::KernelCalled { op: "fill_.Scalar", device: t.device() });
    cpu::fill_(t, value)
}

/// `a + alpha * b` for two `foo` tensors of identical shape and dtype.
pub fn add(a: &Tensor, b: &Tensor, alpha: Scalar) -> Result<Tensor> {
    ensure_foo("add.Tensor", a.device())?;
    ensure_foo("add.Tensor", b.device())?;
    cpu::check_binary("add.Tensor", a, b)?;
    let _guard = FooDeviceGuard::new(a.device())?;
    report(Diagnostic::KernelCalled { op: "add.Tensor", device: a.device() });
    cpu::add_into(a, b, alpha, allocator()?)
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

fn boxed_copy_from(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let mut args = Args::new(op.name().as_str(), stack);
    let src: Tensor = args.next("self")?;
    let dst: Tensor = args.next("dst")?;
    let _non_blocking: Option<bool> = args.next("non_blocking")?;
    copy_from(&src, &dst)?;
    stack.push(dst.into());
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

/// Installs every override under the `PrivateUse1` key.
///
/// Fails on the first operator that already has a `PrivateUse1` kernel.
pub fn register(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher
        .library(DispatchKey::PrivateUse1)
        .impl_kernel("empty.memory_format", boxed_empty)?
        .impl_kernel("empty_strided", boxed_empty_strided)?
        .impl_kernel("copy_", boxed_copy)?
        .impl_kernel("_to_copy", boxed_to_copy)?
        .impl_kernel("_copy_from", boxed_copy_from)?
        .impl_kernel("fill_.Scalar", boxed_fill)?
        .impl_kernel("add.Tensor", boxed_add)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;
    use crate::tensors::DType;

    fn setup() -> Device {
        crate::foo::initialize().unwrap();
        Device::privateuse1(0)
    }

    fn foo_tensor(values: &[f32], device: Device) -> Tensor {
        let cpu = Tensor::from_slice(vec![values.len()], values).unwrap();
        to_copy(&cpu, &TensorOptions::new().device(device), None).unwrap()
    }

    #[test]
    fn empty_allocates_on_the_requested_device() {
        let device = setup();
        let t = empty(&[2, 3], &TensorOptions::new().device(Device::privateuse1(1)), None).unwrap();
        assert_eq!(t.device(), Device::privateuse1(1));
        assert_eq!(t.storage().nbytes(), 24);
        assert!(empty(&[2], &TensorOptions::new().device(device).pin_memory(true), None).is_err());
        let sparse = TensorOptions::new().device(device).layout(Layout::Sparse);
        assert!(empty(&[2], &sparse, None).is_err());
        assert!(empty(&[2], &TensorOptions::new(), None).is_err());
    }

    #[test]
    fn add_uses_alpha() {
        let device = setup();
        let a = foo_tensor(&[1.0, 2.0, 3.0], device);
        let b = foo_tensor(&[10.0, 20.0, 30.0], device);
        let c = add(&a, &b, Scalar::Int(1)).unwrap();
        assert_eq!(c.device(), device);
        assert_eq!(c.to_vec::<f32>().unwrap(), vec![11.0, 22.0, 33.0]);
        let d = add(&a, &b, Scalar::Int(2)).unwrap();
        assert_eq!(d.to_vec::<f32>().unwrap(), vec![21.0, 42.0, 63.0]);
    }

    #[test]
    fn add_rejects_cpu_operands_and_shape_mismatch() {
        let device = setup();
        let a = foo_tensor(&[1.0, 2.0], device);
        assert!(add(&a, &Tensor::new(vec![2], vec![1.0f32, 1.0]), Scalar::Int(1)).is_err());
        assert!(add(&a, &foo_tensor(&[1.0], device), Scalar::Int(1)).is_err());
    }

    #[test]
    fn copy_requires_a_foo_destination() {
        let device = setup();
        let src = foo_tensor(&[4.0, 5.0], device);
        let cpu_dst = Tensor::new(vec![2], vec![0.0f32, 0.0]);
        assert!(copy_(&cpu_dst, &src).is_err());

        let dst = empty(&[2], &TensorOptions::new().device(device), None).unwrap();
        copy_(&dst, &src).unwrap();
        assert_eq!(dst.to_vec::<f32>().unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn to_copy_converts_dtype_before_upload() {
        let device = setup();
        let src = tensor!([1.5, 2.5]);
        let options = TensorOptions::new().device(device).dtype(DType::Float32);
        let out = to_copy(&src, &options, None).unwrap();
        assert_eq!(out.dtype(), DType::Float32);
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn to_copy_between_foo_devices_is_unsupported() {
        let device = setup();
        let src = foo_tensor(&[1.0], device);
        let options = TensorOptions::new().device(Device::privateuse1(1));
        let err = to_copy(&src, &options, None).unwrap_err();
        assert!(err.to_string().contains("doesn't support _to_copy"));
    }

    #[test]
    fn copy_from_is_a_raw_copy() {
        let device = setup();
        let src = Tensor::new(vec![3], vec![7i32, 8, 9]);
        let options = TensorOptions::new().device(device).dtype(DType::Int32);
        let dst = empty(&[3], &options, None).unwrap();
        copy_from(&src, &dst).unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![7, 8, 9]);

        let base = Tensor::new(vec![2, 2], vec![1i32, 2, 3, 4]);
        let transposed = base.as_strided(&[2, 2], &[1, 2], 0).unwrap();
        let dst = empty(&[2, 2], &options, None).unwrap();
        assert!(copy_from(&transposed, &dst).is_err());
    }

    #[test]
    fn fill_writes_every_element() {
        let device = setup();
        let t = empty(&[3], &TensorOptions::new().device(device), None).unwrap();
        fill_(&t, Scalar::Float(0.25)).unwrap();
        assert_eq!(t.to_vec::<f32>().unwrap(), vec![0.25; 3]);
    }

    #[test]
    fn registering_twice_fails() {
        let d = Dispatcher::new();
        register(&d).unwrap();
        assert!(register(&d).is_err());
        assert!(d.has_kernel("_copy_from", DispatchKey::PrivateUse1));
    }
}
