use foo_backend::backend::Device;
use foo_backend::ops::{self, dispatch::dispatcher, ivalue::IValue};
use foo_backend::tensors::{DType, MemoryFormat, Scalar, Tensor, TensorOptions};
use foo_backend::{Error, tensor};

#[test]
fn test_tensor_creation() {
    let t = Tensor::new(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.strides(), &[2, 1]);
    assert_eq!(t.dtype(), DType::Float32);
    assert!(t.device().is_cpu());
    assert_eq!(t.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_tensor_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0]);
    });
    assert!(result.is_err());
    assert!(Tensor::from_slice(vec![2, 2], &[1.0, 2.0, 3.0]).is_err());
}

#[test]
fn test_views_share_storage() {
    let t = Tensor::new(vec![2, 3], vec![1i64, 2, 3, 4, 5, 6]);
    let row = t.as_strided(&[3], &[1], 3).unwrap();
    assert!(row.shares_storage(&t));
    assert_eq!(row.to_vec::<i64>().unwrap(), vec![4, 5, 6]);
    assert!(t.as_strided(&[3], &[1], 4).is_err());
}

#[test]
fn test_empty_and_fill() {
    let t = ops::empty(&[3], &TensorOptions::new().dtype(DType::UInt8)).unwrap();
    ops::fill_(&t, 200).unwrap();
    assert_eq!(t.to_vec::<u8>().unwrap(), vec![200; 3]);
}

#[test]
fn test_empty_channels_last() {
    let options = TensorOptions::new().memory_format(MemoryFormat::ChannelsLast);
    let t = ops::empty(&[2, 3, 4, 5], &options).unwrap();
    assert_eq!(t.strides(), &[60, 1, 15, 3]);
    assert!(ops::empty(&[2, 3], &options).is_err());
    assert!(ops::empty(&[2], &TensorOptions::new().memory_format(MemoryFormat::Preserve)).is_err());
}

#[test]
fn test_copy_casts_between_dtypes() {
    let src = Tensor::new(vec![3], vec![1.9f64, -2.5, 3.0]);
    let dst = ops::empty(&[3], &TensorOptions::new().dtype(DType::Int32)).unwrap();
    let out = ops::copy_(&dst, &src).unwrap();
    assert!(out.is_same(&dst));
    assert_eq!(dst.to_vec::<i32>().unwrap(), vec![1, -2, 3]);
}

#[test]
fn test_to_makes_contiguous_copies() {
    let t = Tensor::new(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
    let transposed = t.as_strided(&[2, 2], &[1, 2], 0).unwrap();
    let copy = ops::to(&transposed, &TensorOptions::new()).unwrap();
    assert!(copy.is_contiguous());
    assert!(!copy.shares_storage(&t));
    assert_eq!(copy.to_vec::<f32>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);

    let widened = ops::to(&t, &TensorOptions::new().dtype(DType::Float64)).unwrap();
    assert_eq!(widened.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_elementwise_ops() {
    let a = tensor!([1.0, -2.0, 3.0]);
    let b = tensor!([4.0, 5.0, -6.0]);
    assert_eq!(ops::add(&a, &b).unwrap().to_vec::<f64>().unwrap(), vec![5.0, 3.0, -3.0]);
    assert_eq!(ops::add_scaled(&a, &b, 0.5).unwrap().to_vec::<f64>().unwrap(), vec![3.0, 0.5, 0.0]);
    assert_eq!(ops::sub(&a, &b).unwrap().to_vec::<f64>().unwrap(), vec![-3.0, -7.0, 9.0]);
    assert_eq!(ops::mul(&a, &b).unwrap().to_vec::<f64>().unwrap(), vec![4.0, -10.0, -18.0]);
    assert_eq!(ops::neg(&a).unwrap().to_vec::<f64>().unwrap(), vec![-1.0, 2.0, -3.0]);
    assert_eq!(ops::relu(&a).unwrap().to_vec::<f64>().unwrap(), vec![1.0, 0.0, 3.0]);
}

#[test]
fn test_mul_in_place_returns_self() {
    let a = Tensor::new(vec![2], vec![3i64, 4]);
    let out = ops::mul_(&a, &Tensor::new(vec![2], vec![2i64, 5])).unwrap();
    assert!(out.is_same(&a));
    assert_eq!(a.to_vec::<i64>().unwrap(), vec![6, 20]);
}

#[test]
fn test_integer_ops_wrap_on_overflow() {
    let a = Tensor::new(vec![2], vec![250u8, 3]);
    let b = Tensor::new(vec![2], vec![10u8, 5]);
    assert_eq!(ops::add(&a, &b).unwrap().to_vec::<u8>().unwrap(), vec![4, 8]);
    assert_eq!(ops::sub(&b, &a).unwrap().to_vec::<u8>().unwrap(), vec![16, 2]);
    assert_eq!(ops::mul(&a, &b).unwrap().to_vec::<u8>().unwrap(), vec![196, 15]);

    let m = Tensor::new(vec![1], vec![i64::MAX]);
    ops::mul_(&m, &Tensor::new(vec![1], vec![2i64])).unwrap();
    assert_eq!(m.to_vec::<i64>().unwrap(), vec![-2]);
}

#[test]
fn test_binary_ops_do_not_broadcast() {
    let a = tensor!([1.0, 2.0]);
    let err = ops::add(&a, &tensor!([[1.0, 2.0]])).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    let err = ops::mul(&a, &Tensor::new(vec![2], vec![1i32, 2])).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));
}

#[test]
fn test_unknown_operator_is_not_implemented() {
    let mut stack = vec![IValue::from(tensor!([1.0]))];
    let err = dispatcher().call("sigmoid", &mut stack).unwrap_err();
    assert!(matches!(err, Error::NotImplemented { .. }));
}

#[test]
fn test_boxed_arguments_are_type_checked() {
    let mut stack = vec![IValue::Bool(true)];
    let err = dispatcher().call("neg", &mut stack).unwrap_err();
    assert_eq!(err.to_string(), "neg: invalid argument 'self': unexpected bool");
}

#[test]
fn test_scalar_conversions() {
    assert_eq!(Scalar::from(3).to_f64(), 3.0);
    assert_eq!(Scalar::from(false).cast::<i64>(), 0);
    assert_eq!(Device::default(), Device::cpu());
}
