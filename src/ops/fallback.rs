//! Generic CPU fallback.
//!
//! [`cpu_fallback`] runs any operator on the reference backend on behalf of
//! another backend:
//!
//! 1. every non-CPU tensor argument is copied to the CPU through `_to_copy`,
//!    and non-CPU device arguments are rewritten to `cpu`
//! 2. the operator is re-dispatched with the `CPU` key, inside a guard for the
//!    originating device
//! 3. in-place operators return the original `self`; when it lives off the
//!    CPU the mutated copy is first written back with `copy_`
//! 4. otherwise every returned tensor is copied back to the originating device
//!
//! Transfers go through the dispatcher, so the originating backend must
//! register its own `_to_copy` and `copy_`.

use super::dispatch::{Dispatcher, OperatorHandle};
use super::ivalue::{IValue, Stack, push_tensor_options};
use crate::backend::{Device, DispatchKey};
use crate::error::Result;
use crate::guard::OptionalDeviceGuard;
use crate::tensors::{Tensor, TensorOptions};

/// Copies `t` to `device` through the dispatcher's `_to_copy`.
pub fn to_device_via(dispatcher: &Dispatcher, t: &Tensor, device: Device) -> Result<Tensor> {
    let mut stack: Stack = vec![t.into()];
    push_tensor_options(&mut stack, &TensorOptions::new().device(device));
    dispatcher.call_tensor("_to_copy", stack)
}

/// Runs `op` on the reference backend and moves results back.
pub fn cpu_fallback(op: &OperatorHandle<'_>, stack: &mut Stack) -> Result<()> {
    let dispatcher = op.dispatcher();
    let arguments = std::mem::take(stack);

    let inplace = op.name().is_inplace();
    let mut target: Option<Device> = None;
    let mut original_self: Option<Tensor> = None;
    let mut cpu_arguments = Stack::with_capacity(arguments.len());
    for (position, value) in arguments.into_iter().enumerate() {
        if inplace && position == 0 {
            if let IValue::Tensor(t) = &value {
                original_self = Some(t.clone());
            }
        }
        let value = match value {
            IValue::Tensor(t) if !t.device().is_cpu() => {
                target.get_or_insert(t.device());
                IValue::Tensor(to_device_via(dispatcher, &t, Device::cpu())?)
            }
            IValue::Device(d) if !d.is_cpu() => {
                target.get_or_insert(d);
                IValue::Device(Device::cpu())
            }
            other => other,
        };
        cpu_arguments.push(value);
    }

    let _guard = OptionalDeviceGuard::new(target)?;
    op.redispatch(DispatchKey::Cpu, &mut cpu_arguments)?;

    if let Some(original) = original_self {
        if !original.device().is_cpu() {
            let mut copy_stack: Stack = vec![original.clone().into()];
            copy_stack.extend(cpu_arguments.into_iter().take(1));
            dispatcher.call("copy_", &mut copy_stack)?;
        }
        stack.push(original.into());
        return Ok(());
    }

    for value in cpu_arguments {
        let value = match (value, target) {
            (IValue::Tensor(t), Some(device)) => {
                IValue::Tensor(to_device_via(dispatcher, &t, device)?)
            }
            (value, _) => value,
        };
        stack.push(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn cpu_operands_pass_straight_through() {
        let d = Dispatcher::with_reference_kernels();
        d.library(DispatchKey::PrivateUse1).fallback(cpu_fallback).unwrap();

        let mut stack: Stack = vec![tensor!([1.0, -2.0]).into()];
        d.call_with_key("relu", DispatchKey::PrivateUse1, &mut stack).unwrap();
        let out = stack.pop().unwrap().into_tensor().unwrap();
        assert!(out.device().is_cpu());
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.0, 0.0]);
    }
}
