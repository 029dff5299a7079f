use std::sync::{Arc, Barrier};

use foo_backend::alloc::get_allocator;
use foo_backend::backend::{Device, DeviceType, DispatchKey};
use foo_backend::config::BackendConfig;
use foo_backend::diagnostics::{self, Diagnostic, RecordingSink};
use foo_backend::foo::{
    self, fallback::CpuFallback, guard::FooDeviceGuard, guard_impl::current_device, kernels,
};
use foo_backend::guard::{DeviceGuard, EventFlag, guard_impl};
use foo_backend::ops::{self, dispatch::Dispatcher, ivalue::{IValue, Stack}};
use foo_backend::tensors::{DType, Tensor, TensorOptions};
use foo_backend::{Error, tensor};
use rand::Rng;

fn foo0() -> Device {
    foo::initialize().unwrap();
    Device::privateuse1(0)
}

#[test]
fn test_initialize_is_idempotent() {
    foo::initialize().unwrap();
    foo::initialize().unwrap();
    assert!(foo::is_initialized());

    let err = foo::initialize_with(BackendConfig::default().with_device_count(3)).unwrap_err();
    assert!(matches!(err, Error::AlreadyInitialized));

    let err = foo::initialize_with(BackendConfig::default().with_name("")).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[test]
fn test_device_strings_use_registered_name() {
    foo0();
    let d: Device = "foo:1".parse().unwrap();
    assert_eq!(d, Device::privateuse1(1));
    assert_eq!(d.to_string(), "foo:1");
    assert_eq!(Device::parse("foo").unwrap().index(), None);
    assert!(Device::parse("bar:0").is_err());
}

#[test]
fn test_registry_guard_switches_foo_device() {
    foo0();
    let registered = guard_impl(DeviceType::PrivateUse1).unwrap();
    assert_eq!(registered.device_count(), 2);

    let _outer = FooDeviceGuard::with_index(0).unwrap();
    {
        let guard = DeviceGuard::new(Device::privateuse1(1)).unwrap();
        assert_eq!(guard.original_device(), Device::privateuse1(0));
        assert_eq!(registered.get_device(), Device::privateuse1(1));
    }
    assert_eq!(current_device(), Some(0));
}

#[test]
fn test_registered_guard_rejects_events() {
    foo0();
    let registered = guard_impl(DeviceType::PrivateUse1).unwrap();
    let stream = registered.get_stream(Device::privateuse1(0));
    let mut event = None;
    let err = registered.record(&mut event, &stream, 0, EventFlag::Default).unwrap_err();
    assert_eq!(err.to_string(), "foo backend doesn't support event recording");
    assert!(event.is_none());
}

#[test]
fn test_threads_have_independent_devices() {
    foo0();
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [0u8, 1]
        .into_iter()
        .map(|index| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let _guard = FooDeviceGuard::with_index(index).unwrap();
                barrier.wait();
                let seen = current_device();
                barrier.wait();
                seen
            })
        })
        .collect();

    let seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(seen, vec![Some(0), Some(1)]);
}

#[test]
fn test_device_count_and_availability() {
    foo0();
    assert_eq!(foo::device_count(), 2);
    assert!(foo::is_available());
    let _guard = FooDeviceGuard::with_index(1).unwrap();
    assert_eq!(foo::current_device(), Some(1));
}

#[test]
fn test_zero_byte_allocation_and_null_delete() {
    foo0();
    let allocator = get_allocator(DeviceType::PrivateUse1).unwrap();
    let data = allocator.allocate(0).unwrap();
    assert_eq!(data.nbytes(), 0);
    drop(data);

    let deleter = allocator.raw_deleter().unwrap();
    unsafe { deleter(std::ptr::null_mut()) };
}

#[test]
fn test_allocation_freed_on_another_thread() {
    foo0();
    let allocator = get_allocator(DeviceType::PrivateUse1).unwrap();
    let mut data = allocator.allocate(64).unwrap();
    data.as_bytes_mut().fill(9);

    let handle = std::thread::spawn(move || {
        let sum: u32 = data.as_bytes().iter().map(|&b| u32::from(b)).sum();
        drop(data);
        sum
    });
    assert_eq!(handle.join().unwrap(), 9 * 64);
}

#[test]
fn test_allocations_are_reported() {
    foo0();
    let sink = Arc::new(RecordingSink::new());
    let previous = diagnostics::set_sink(sink.clone());

    let allocator = get_allocator(DeviceType::PrivateUse1).unwrap();
    let data = allocator.allocate(1234).unwrap();
    let ptr = data.as_ptr() as usize;
    drop(data);
    diagnostics::set_sink(previous);

    let allocated =
        sink.count(|e| matches!(e, Diagnostic::Allocate { ptr: p, nbytes: 1234, .. } if *p == ptr));
    assert!(allocated >= 1);
    assert!(sink.count(|e| matches!(e, Diagnostic::Free { ptr: p } if *p == ptr)) >= 1);
}

#[test]
fn test_add_on_foo() {
    let device = foo0();
    let x = tensor!([1.0, 2.0, 3.0]).to_device(device).unwrap();
    let y = tensor!([10.0, 20.0, 30.0]).to_device(device).unwrap();

    let z = ops::add(&x, &y).unwrap();
    assert_eq!(z.device(), device);
    assert_eq!(z.shape(), &[3]);
    let back = z.to_device(Device::cpu()).unwrap();
    assert_eq!(back.to_vec::<f64>().unwrap(), vec![11.0, 22.0, 33.0]);

    let scaled = ops::add_scaled(&x, &y, 2).unwrap();
    assert_eq!(scaled.to_vec::<f64>().unwrap(), vec![21.0, 42.0, 63.0]);
}

#[test]
fn test_add_wraps_integer_overflow_on_foo() {
    let device = foo0();
    let x = Tensor::new(vec![3], vec![200u8, 255, 7]).to_device(device).unwrap();
    let y = Tensor::new(vec![3], vec![100u8, 1, 8]).to_device(device).unwrap();
    let z = ops::add(&x, &y).unwrap();
    assert_eq!(z.device(), device);
    assert_eq!(z.to_vec::<u8>().unwrap(), vec![44, 0, 15]);

    let big = Tensor::new(vec![1], vec![i32::MAX]).to_device(device).unwrap();
    let scaled = ops::add_scaled(&big, &big, 2).unwrap();
    let expected = i32::MAX.wrapping_add(i32::MAX.wrapping_mul(2));
    assert_eq!(scaled.to_vec::<i32>().unwrap(), vec![expected]);
}

#[test]
fn test_add_rejects_mixed_devices() {
    let device = foo0();
    let x = tensor!([1.0, 2.0]).to_device(device).unwrap();
    let y = tensor!([1.0, 2.0]).to_device(Device::privateuse1(1)).unwrap();
    assert!(matches!(ops::add(&x, &y).unwrap_err(), Error::WrongDevice { .. }));
    assert!(ops::add(&x, &tensor!([1.0, 2.0])).is_err());
}

#[test]
fn test_to_copy_round_trip_is_byte_exact() {
    let device = foo0();
    let mut rng = rand::rng();
    let values: Vec<f32> = (0..64).map(|_| rng.random_range(-1e6..1e6)).collect();

    for cpu in [Tensor::new(vec![8, 8], values), Tensor::new(vec![4, 4], vec![0i64; 16])] {
        let on_foo = cpu.to_device(device).unwrap();
        assert_eq!(on_foo.device(), device);
        let back = on_foo.to_device(Device::cpu()).unwrap();
        assert!(back.device().is_cpu());
        assert_eq!(back.to_bytes().unwrap(), cpu.to_bytes().unwrap());
    }
}

#[test]
fn test_to_copy_changes_dtype_on_upload() {
    let device = foo0();
    let cpu = Tensor::new(vec![3], vec![1i32, 2, 3]);
    let on_foo = ops::to(&cpu, &TensorOptions::new().device(device).dtype(DType::Float64)).unwrap();
    assert_eq!(on_foo.dtype(), DType::Float64);
    assert_eq!(on_foo.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_copy_into_cpu_destination_is_rejected() {
    let device = foo0();
    let src = tensor!([1.0]).to_device(device).unwrap();
    let dst = tensor!([0.0]);
    assert!(matches!(ops::copy_(&dst, &src).unwrap_err(), Error::WrongDevice { .. }));
}

#[test]
fn test_fill_returns_same_tensor() {
    let device = foo0();
    let t = ops::empty(&[2, 2], &TensorOptions::new().device(device).dtype(DType::Int32)).unwrap();
    let filled = ops::fill_(&t, 7).unwrap();
    assert!(filled.is_same(&t));
    assert_eq!(t.to_vec::<i32>().unwrap(), vec![7; 4]);
}

#[test]
fn test_fallback_warns_once_per_operator() {
    let device = foo0();
    let d = Dispatcher::with_reference_kernels();
    kernels::register(&d).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let bridge = Arc::new(CpuFallback::with_sink(sink.clone()));
    Arc::clone(&bridge).register(&d).unwrap();

    let x = tensor!([1.0, -2.0, 3.0]).to_device(device).unwrap();
    let mut results = Vec::new();
    for _ in 0..2 {
        let mut stack: Stack = vec![IValue::from(&x)];
        d.call("neg", &mut stack).unwrap();
        results.push(stack.pop().unwrap().into_tensor().unwrap());
    }

    assert_eq!(sink.count(|e| matches!(e, Diagnostic::CpuFallback { op } if op == "neg")), 1);
    assert!(bridge.has_warned("neg"));
    for r in &results {
        assert_eq!(r.device(), device);
        assert_eq!(r.to_vec::<f64>().unwrap(), vec![-1.0, 2.0, -3.0]);
    }

    let mut stack: Stack = vec![IValue::from(&x)];
    d.call("relu", &mut stack).unwrap();
    assert_eq!(bridge.warned_count(), 2);
    assert_eq!(sink.count(|e| matches!(e, Diagnostic::CpuFallback { .. })), 2);
}

#[test]
fn test_fallback_warns_once_under_concurrent_first_calls() {
    let device = foo0();
    let d = Dispatcher::with_reference_kernels();
    kernels::register(&d).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let bridge = Arc::new(CpuFallback::with_sink(sink.clone()));
    Arc::clone(&bridge).register(&d).unwrap();
    assert!(d.has_fallback(DispatchKey::PrivateUse1));

    let x = tensor!([-1.0, 2.0]).to_device(device).unwrap();
    let threads = 8;
    let barrier = Barrier::new(threads);
    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                let mut stack: Stack = vec![IValue::from(&x)];
                d.call("relu", &mut stack).unwrap();
                let r = stack.pop().unwrap().into_tensor().unwrap();
                assert_eq!(r.to_vec::<f64>().unwrap(), vec![0.0, 2.0]);
            });
        }
    });

    assert!(sink.count(|e| matches!(e, Diagnostic::CpuFallback { op } if op == "relu")) <= 2);
    assert_eq!(bridge.warned_count(), 1);
}

#[test]
fn test_fallback_overrides_take_precedence() {
    let device = foo0();
    let d = Dispatcher::with_reference_kernels();
    kernels::register(&d).unwrap();
    let sink = Arc::new(RecordingSink::new());
    Arc::new(CpuFallback::with_sink(sink.clone())).register(&d).unwrap();

    let x = tensor!([1.0, 2.0]).to_device(device).unwrap();
    let mut stack: Stack = vec![IValue::from(&x), IValue::from(&x), IValue::None];
    d.call("add.Tensor", &mut stack).unwrap();
    assert!(sink.events().is_empty());
}

#[test]
fn test_inplace_fallback_writes_back() {
    let device = foo0();
    let a = tensor!([1.0, 2.0, 3.0]).to_device(device).unwrap();
    let b = tensor!([2.0, 3.0, 4.0]).to_device(device).unwrap();

    let out = ops::mul_(&a, &b).unwrap();
    assert!(out.is_same(&a));
    assert_eq!(a.to_vec::<f64>().unwrap(), vec![2.0, 6.0, 12.0]);
}

#[test]
fn test_inplace_fallback_with_cpu_self_returns_self() {
    let device = foo0();
    let a = tensor!([1.0, 2.0, 3.0]);
    let b = tensor!([2.0, 3.0, 4.0]).to_device(device).unwrap();

    let out = ops::mul_(&a, &b).unwrap();
    assert!(out.is_same(&a));
    assert!(out.device().is_cpu());
    assert_eq!(a.to_vec::<f64>().unwrap(), vec![2.0, 6.0, 12.0]);
}

#[test]
fn test_fallback_results_return_to_origin_device() {
    foo0();
    let device = Device::privateuse1(1);
    let a = tensor!([-1.0, 4.0]).to_device(device).unwrap();
    let r = ops::relu(&a).unwrap();
    assert_eq!(r.device(), device);
    assert_eq!(r.to_vec::<f64>().unwrap(), vec![0.0, 4.0]);

    let s = ops::sub(&a, &a).unwrap();
    assert_eq!(s.device(), device);
    assert_eq!(s.to_vec::<f64>().unwrap(), vec![0.0, 0.0]);
}

#[test]
fn test_duplicate_registration_fails() {
    let d = Dispatcher::new();
    kernels::register(&d).unwrap();
    assert!(matches!(kernels::register(&d).unwrap_err(), Error::DuplicateKernel { .. }));

    Arc::new(CpuFallback::new()).register(&d).unwrap();
    assert!(matches!(
        Arc::new(CpuFallback::new()).register(&d).unwrap_err(),
        Error::DuplicateFallback { key: DispatchKey::PrivateUse1 }
    ));
}

#[test]
fn test_empty_strided_on_foo() {
    let device = foo0();
    let t = ops::empty_strided(&[2, 3], &[1, 2], &TensorOptions::new().device(device)).unwrap();
    assert_eq!(t.strides(), &[1, 2]);
    assert_eq!(t.device(), device);
    assert!(!t.is_contiguous());

    let pinned = TensorOptions::new().device(device).pin_memory(true);
    assert!(matches!(ops::empty(&[2], &pinned).unwrap_err(), Error::Unsupported { .. }));
}
