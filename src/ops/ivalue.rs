//! Boxed calling convention.
//!
//! Boxed kernels receive their arguments as a [`Stack`] of [`IValue`]s, pop
//! them in schema order, and push their results back. That uniform shape is
//! what lets one fallback kernel stand in for every operator.

use crate::backend::Device;
use crate::error::{Error, Result};
use crate::tensors::{DType, Layout, MemoryFormat, Scalar, Tensor, TensorOptions};

/// A boxed argument or return value.
#[derive(Debug, Clone)]
pub enum IValue {
    None,
    Tensor(Tensor),
    Scalar(Scalar),
    Int(i64),
    Bool(bool),
    IntList(Vec<usize>),
    DType(DType),
    Layout(Layout),
    Device(Device),
    MemoryFormat(MemoryFormat),
}

pub type Stack = Vec<IValue>;

impl IValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Tensor(_) => "Tensor",
            Self::Scalar(_) => "Scalar",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::IntList(_) => "int[]",
            Self::DType(_) => "ScalarType",
            Self::Layout(_) => "Layout",
            Self::Device(_) => "Device",
            Self::MemoryFormat(_) => "MemoryFormat",
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Tensor> for IValue {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<&Tensor> for IValue {
    fn from(t: &Tensor) -> Self {
        Self::Tensor(t.clone())
    }
}

impl From<Scalar> for IValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

impl From<i64> for IValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for IValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<usize>> for IValue {
    fn from(v: Vec<usize>) -> Self {
        Self::IntList(v)
    }
}

impl From<&[usize]> for IValue {
    fn from(v: &[usize]) -> Self {
        Self::IntList(v.to_vec())
    }
}

impl From<DType> for IValue {
    fn from(v: DType) -> Self {
        Self::DType(v)
    }
}

impl From<Layout> for IValue {
    fn from(v: Layout) -> Self {
        Self::Layout(v)
    }
}

impl From<Device> for IValue {
    fn from(v: Device) -> Self {
        Self::Device(v)
    }
}

impl From<MemoryFormat> for IValue {
    fn from(v: MemoryFormat) -> Self {
        Self::MemoryFormat(v)
    }
}

impl<T: Into<IValue>> From<Option<T>> for IValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

/// Conversion out of a boxed value.
pub trait FromIValue: Sized {
    fn from_ivalue(value: IValue) -> Option<Self>;
}

macro_rules! impl_from_ivalue {
    ($t:ty, $variant:ident) => {
        impl FromIValue for $t {
            fn from_ivalue(value: IValue) -> Option<Self> {
                match value {
                    IValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_from_ivalue!(Tensor, Tensor);
impl_from_ivalue!(bool, Bool);
impl_from_ivalue!(Vec<usize>, IntList);
impl_from_ivalue!(DType, DType);
impl_from_ivalue!(Layout, Layout);
impl_from_ivalue!(Device, Device);
impl_from_ivalue!(MemoryFormat, MemoryFormat);

impl FromIValue for Scalar {
    fn from_ivalue(value: IValue) -> Option<Self> {
        match value {
            IValue::Scalar(s) => Some(s),
            IValue::Int(v) => Some(Scalar::Int(v)),
            IValue::Bool(v) => Some(Scalar::Bool(v)),
            _ => None,
        }
    }
}

impl FromIValue for i64 {
    fn from_ivalue(value: IValue) -> Option<Self> {
        match value {
            IValue::Int(v) => Some(v),
            IValue::Scalar(Scalar::Int(v)) => Some(v),
            _ => None,
        }
    }
}

impl<T: FromIValue> FromIValue for Option<T> {
    fn from_ivalue(value: IValue) -> Option<Self> {
        match value {
            IValue::None => Some(None),
            v => T::from_ivalue(v).map(Some),
        }
    }
}

/// Pops a kernel's arguments off a stack, in schema order.
///
/// The stack is drained on construction so the kernel can push its results.
/// Arguments missing from the end of the stack read as `None`.
#[derive(Debug)]
pub struct Args {
    op: String,
    values: std::vec::IntoIter<IValue>,
}

impl Args {
    pub fn new(op: impl Into<String>, stack: &mut Stack) -> Self {
        Self { op: op.into(), values: std::mem::take(stack).into_iter() }
    }

    pub fn next<T: FromIValue>(&mut self, name: &str) -> Result<T> {
        let value = self.values.next().unwrap_or(IValue::None);
        let kind = value.kind();
        T::from_ivalue(value).ok_or_else(|| Error::InvalidArgument {
            op: self.op.clone(),
            name: name.to_owned(),
            reason: format!("unexpected {kind}"),
        })
    }

    /// Reads the `dtype, layout, device, pin_memory` argument group.
    pub fn tensor_options(&mut self) -> Result<TensorOptions> {
        let dtype: Option<DType> = self.next("dtype")?;
        let layout: Option<Layout> = self.next("layout")?;
        let device: Option<Device> = self.next("device")?;
        let pin_memory: Option<bool> = self.next("pin_memory")?;

        let mut options = TensorOptions::new();
        if let Some(dtype) = dtype {
            options = options.dtype(dtype);
        }
        if let Some(layout) = layout {
            options = options.layout(layout);
        }
        if let Some(device) = device {
            options = options.device(device);
        }
        if let Some(pin_memory) = pin_memory {
            options = options.pin_memory(pin_memory);
        }
        Ok(options)
    }
}

/// Pushes the `dtype, layout, device, pin_memory` argument group.
pub fn push_tensor_options(stack: &mut Stack, options: &TensorOptions) {
    stack.push(options.dtype_opt().into());
    stack.push(options.layout_opt().into());
    stack.push(options.device_opt().into());
    stack.push(options.pin_memory_opt().into());
}
