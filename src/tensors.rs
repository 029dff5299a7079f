//! Core tensor data structures.
//!
//! # Core Tensor Utilities
//!
//! This module defines how tensors are represented on every backend:
//!
//! - A [`Storage`] owns one raw block obtained from the allocator registered
//!   for its device type, and remembers which allocator that was.
//! - A [`Tensor`] is a strided view (`shape`, `strides`, `storage_offset`,
//!   [`DType`]) over a shared `Storage`. Cloning a tensor clones the view,
//!   not the data.
//! - Element access is strided and happens through the typed helpers
//!   [`Tensor::to_vec`] and [`Tensor::write_slice`].
//!
//! ## Design Highlights
//! - Storage data sits behind a `RwLock`, so in-place kernels take `&Tensor`.
//! - Every backend in this crate keeps its memory host-addressable, which is
//!   what lets reference kernels read and write tensors of any device.
//! - The `tensor!` macro builds CPU tensors from nested literals.
//!
//! ## Limitations
//! - Dense strided layout only
//! - No broadcasting
//!
//! ## Example
//!
//! ```rust
//! use foo_backend::tensors::{DType, Tensor};
//! let t = Tensor::new(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape(), &[2, 3]);
//! assert_eq!(t.dtype(), DType::Float32);
//! ```

use core::fmt;
use core::ops::{Add, Mul, Sub};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard, RwLock};
use snafu::{OptionExt, ensure};

use crate::alloc::{Allocator, CPU_ALLOCATOR, DataPtr};
use crate::backend::Device;
use crate::error::{
    AllocationFailedSnafu, DTypeMismatchSnafu, InvalidArgumentSnafu, Result, SizeMismatchSnafu,
};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    Float32,
    Float64,
    Int32,
    Int64,
    UInt8,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn itemsize(self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
            Self::UInt8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
        })
    }
}

/// A Rust type that can live in tensor storage.
pub trait Element:
    bytemuck::Pod
    + PartialOrd
    + fmt::Debug
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
    const DTYPE: DType;

    fn from_f64(v: f64) -> Self;
    fn from_i64(v: i64) -> Self;
    fn to_f64(self) -> f64;
    fn negate(self) -> Self;

    /// Integer arithmetic wraps on overflow; floats follow IEEE rules.
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn negate(self) -> Self {
                -self
            }
            fn wrapping_add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                self * rhs
            }
        }
    };
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn negate(self) -> Self {
                self.wrapping_neg()
            }
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }
        }
    };
}

impl_float_element!(f32, Float32);
impl_float_element!(f64, Float64);
impl_int_element!(i32, Int32);
impl_int_element!(i64, Int64);
impl_int_element!(u8, UInt8);

/// Runs `$body` with `$T` bound to the Rust type of `$dtype`.
macro_rules! dispatch_dtype {
    ($dtype:expr, |$T:ident| $body:expr) => {
        match $dtype {
            $crate::tensors::DType::Float32 => {
                type $T = f32;
                $body
            }
            $crate::tensors::DType::Float64 => {
                type $T = f64;
                $body
            }
            $crate::tensors::DType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::tensors::DType::Int64 => {
                type $T = i64;
                $body
            }
            $crate::tensors::DType::UInt8 => {
                type $T = u8;
                $body
            }
        }
    };
}
pub(crate) use dispatch_dtype;

/// Memory layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Strided,
    Sparse,
}

/// Requested physical ordering of a new tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryFormat {
    #[default]
    Contiguous,
    /// NHWC ordering for 4-d tensors.
    ChannelsLast,
    /// Keep whatever the source tensor uses. Only meaningful for copies.
    Preserve,
}

/// A dynamically typed scalar operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Float(v) => v,
            Self::Int(v) => v as f64,
            Self::Bool(v) => f64::from(u8::from(v)),
        }
    }

    /// Converts to the element type `T`, truncating like an `as` cast.
    pub fn cast<T: Element>(self) -> T {
        match self {
            Self::Float(v) => T::from_f64(v),
            Self::Int(v) => T::from_i64(v),
            Self::Bool(v) => T::from_i64(i64::from(v)),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Optional construction parameters for factory and conversion operators.
///
/// Unset fields fall back to the runtime defaults: `float32`, strided,
/// `cpu`, unpinned, contiguous.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TensorOptions {
    dtype: Option<DType>,
    layout: Option<Layout>,
    device: Option<Device>,
    pin_memory: Option<bool>,
    memory_format: Option<MemoryFormat>,
}

impl TensorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn pin_memory(mut self, pin_memory: bool) -> Self {
        self.pin_memory = Some(pin_memory);
        self
    }

    pub fn memory_format(mut self, memory_format: MemoryFormat) -> Self {
        self.memory_format = Some(memory_format);
        self
    }

    pub fn dtype_opt(&self) -> Option<DType> {
        self.dtype
    }

    pub fn layout_opt(&self) -> Option<Layout> {
        self.layout
    }

    pub fn device_opt(&self) -> Option<Device> {
        self.device
    }

    pub fn pin_memory_opt(&self) -> Option<bool> {
        self.pin_memory
    }

    pub fn memory_format_opt(&self) -> Option<MemoryFormat> {
        self.memory_format
    }
}

pub fn dtype_or_default(dtype: Option<DType>) -> DType {
    dtype.unwrap_or_default()
}

pub fn layout_or_default(layout: Option<Layout>) -> Layout {
    layout.unwrap_or_default()
}

pub fn device_or_default(device: Option<Device>) -> Device {
    device.unwrap_or_default()
}

pub fn pinned_memory_or_default(pin_memory: Option<bool>) -> bool {
    pin_memory.unwrap_or(false)
}

/// A raw block plus the allocator it came from.
pub struct Storage {
    data: RwLock<DataPtr>,
    nbytes: usize,
    device: Device,
    allocator: &'static dyn Allocator,
}

impl Storage {
    /// Allocates `nbytes` from `allocator`.
    pub fn new(nbytes: usize, allocator: &'static dyn Allocator) -> Result<Self> {
        let data = allocator.allocate(nbytes)?;
        Ok(Self::from_data_ptr(data, allocator))
    }

    pub fn from_data_ptr(data: DataPtr, allocator: &'static dyn Allocator) -> Self {
        Self { nbytes: data.nbytes(), device: data.device(), data: RwLock::new(data), allocator }
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn allocator(&self) -> &'static dyn Allocator {
        self.allocator
    }

    pub fn data(&self) -> RwLockReadGuard<'_, DataPtr> {
        self.data.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, DataPtr> {
        self.data.write()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("nbytes", &self.nbytes)
            .field("device", &self.device)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

/// Row-major strides for `shape`.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1;
    for (stride, size) in strides.iter_mut().zip(shape).rev() {
        *stride = acc;
        acc *= (*size).max(1);
    }
    strides
}

/// NHWC strides for a 4-d NCHW shape.
pub fn channels_last_strides(shape: &[usize]) -> Option<Vec<usize>> {
    let [_, c, h, w] = shape else { return None };
    let (c, h, w) = ((*c).max(1), (*h).max(1), (*w).max(1));
    Some(vec![h * w * c, 1, w * c, c])
}

/// Number of elements a storage needs to back `shape` with `strides`, or
/// `None` if that overflows `usize`.
pub fn storage_len_for(shape: &[usize], strides: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape
        .iter()
        .zip(strides)
        .try_fold(1usize, |acc, (size, stride)| acc.checked_add((size - 1).checked_mul(*stride)?))
}

/// Storage offsets of every element of a strided view, in row-major order.
pub fn element_offsets(shape: &[usize], strides: &[usize], offset: usize) -> Vec<usize> {
    let numel: usize = shape.iter().product();
    let mut out = Vec::with_capacity(numel);
    if numel == 0 {
        return out;
    }

    let mut index = vec![0usize; shape.len()];
    let mut pos = offset;
    loop {
        out.push(pos);
        let mut dim = shape.len();
        loop {
            if dim == 0 {
                return out;
            }
            dim -= 1;
            index[dim] += 1;
            pos += strides[dim];
            if index[dim] < shape[dim] {
                break;
            }
            pos -= strides[dim] * shape[dim];
            index[dim] = 0;
        }
    }
}

/// A strided, typed view over shared storage.
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    storage_offset: usize,
    dtype: DType,
}

impl Tensor {
    /// Creates a contiguous CPU tensor from flat row-major data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape
    /// product, or if host memory cannot be allocated.
    pub fn new<T: Element>(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self::from_slice(shape, &data).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Fallible form of [`Tensor::new`].
    pub fn from_slice<T: Element>(shape: impl Into<Vec<usize>>, data: &[T]) -> Result<Self> {
        let shape = shape.into();
        let numel: usize = shape.iter().product();
        ensure!(numel == data.len(), SizeMismatchSnafu { expected: numel, actual: data.len() });

        let tensor = empty_generic(&shape, &CPU_ALLOCATOR, T::DTYPE, None)?;
        tensor.write_slice(data)?;
        Ok(tensor)
    }

    /// Builds a view over existing storage without checking bounds.
    pub fn from_storage(
        storage: Arc<Storage>,
        shape: Vec<usize>,
        strides: Vec<usize>,
        storage_offset: usize,
        dtype: DType,
    ) -> Self {
        Self { storage, shape, strides, storage_offset, dtype }
    }

    /// Returns a new view over the same storage.
    pub fn as_strided(
        &self,
        shape: &[usize],
        strides: &[usize],
        storage_offset: usize,
    ) -> Result<Self> {
        ensure!(
            shape.len() == strides.len(),
            InvalidArgumentSnafu {
                op: "as_strided",
                name: "stride",
                reason: "rank differs from size",
            }
        );
        if !shape.contains(&0) {
            let needed = storage_len_for(shape, strides)
                .and_then(|len| len.checked_add(storage_offset))
                .context(InvalidArgumentSnafu {
                    op: "as_strided",
                    name: "stride",
                    reason: "view extent overflows",
                })?;
            let available = self.storage.nbytes() / self.dtype.itemsize();
            ensure!(
                needed <= available,
                InvalidArgumentSnafu {
                    op: "as_strided",
                    name: "size",
                    reason: format!("view needs {needed} elements, storage holds {available}"),
                }
            );
        }
        Ok(Self::from_storage(
            Arc::clone(&self.storage),
            shape.to_vec(),
            strides.to_vec(),
            storage_offset,
            self.dtype,
        ))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes covered by the logical elements of this view.
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.itemsize()
    }

    pub fn is_contiguous(&self) -> bool {
        self.numel() <= 1 || self.strides == contiguous_strides(&self.shape)
    }

    /// Options describing this tensor's dtype, layout and device.
    pub fn options(&self) -> TensorOptions {
        TensorOptions::new().dtype(self.dtype).layout(Layout::Strided).device(self.device())
    }

    /// Whether both tensors view the same elements of the same storage.
    pub fn is_same(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
            && self.shape == other.shape
            && self.strides == other.strides
            && self.storage_offset == other.storage_offset
    }

    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Storage element offsets in row-major logical order.
    pub fn element_offsets(&self) -> Vec<usize> {
        element_offsets(&self.shape, &self.strides, self.storage_offset)
    }

    /// Reads all elements in row-major order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        ensure!(
            T::DTYPE == self.dtype,
            DTypeMismatchSnafu { expected: self.dtype, actual: T::DTYPE }
        );
        let size = self.dtype.itemsize();
        let offsets = self.element_offsets();
        let data = self.storage.data();
        let bytes = data.as_bytes();
        offsets
            .iter()
            .map(|o| {
                bytes
                    .get(o * size..(o + 1) * size)
                    .map(bytemuck::pod_read_unaligned::<T>)
                    .context(SizeMismatchSnafu { expected: (o + 1) * size, actual: bytes.len() })
            })
            .collect()
    }

    /// Overwrites all elements, in row-major order, with `values`.
    pub fn write_slice<T: Element>(&self, values: &[T]) -> Result<()> {
        ensure!(
            T::DTYPE == self.dtype,
            DTypeMismatchSnafu { expected: self.dtype, actual: T::DTYPE }
        );
        ensure!(
            values.len() == self.numel(),
            SizeMismatchSnafu { expected: self.numel(), actual: values.len() }
        );
        let size = self.dtype.itemsize();
        let offsets = self.element_offsets();
        let mut data = self.storage.data_mut();
        let bytes = data.as_bytes_mut();
        let available = bytes.len();
        for (o, v) in offsets.iter().zip(values) {
            let slot = bytes
                .get_mut(o * size..(o + 1) * size)
                .context(SizeMismatchSnafu { expected: (o + 1) * size, actual: available })?;
            slot.copy_from_slice(bytemuck::bytes_of(v));
        }
        Ok(())
    }

    /// Overwrites all elements from raw row-major bytes of this tensor's dtype.
    pub fn write_bytes(&self, values: &[u8]) -> Result<()> {
        ensure!(
            values.len() == self.nbytes(),
            SizeMismatchSnafu { expected: self.nbytes(), actual: values.len() }
        );
        if self.numel() == 0 {
            return Ok(());
        }
        let size = self.dtype.itemsize();
        let mut data = self.storage.data_mut();
        let bytes = data.as_bytes_mut();
        let available = bytes.len();
        if self.is_contiguous() {
            let start = self.storage_offset * size;
            let slot = bytes
                .get_mut(start..start + values.len())
                .context(SizeMismatchSnafu { expected: start + values.len(), actual: available })?;
            slot.copy_from_slice(values);
            return Ok(());
        }
        for (o, chunk) in self.element_offsets().iter().zip(values.chunks_exact(size)) {
            let slot = bytes
                .get_mut(o * size..(o + 1) * size)
                .context(SizeMismatchSnafu { expected: (o + 1) * size, actual: available })?;
            slot.copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Raw bytes of all elements in row-major order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.numel() == 0 {
            return Ok(Vec::new());
        }
        let size = self.dtype.itemsize();
        let data = self.storage.data();
        let bytes = data.as_bytes();
        if self.is_contiguous() {
            let start = self.storage_offset * size;
            let end = start + self.nbytes();
            let slice = bytes
                .get(start..end)
                .context(SizeMismatchSnafu { expected: end, actual: bytes.len() })?;
            return Ok(slice.to_vec());
        }
        let mut out = Vec::with_capacity(self.nbytes());
        for o in self.element_offsets() {
            let end = (o + 1) * size;
            let slot = bytes
                .get(o * size..end)
                .context(SizeMismatchSnafu { expected: end, actual: bytes.len() })?;
            out.extend_from_slice(slot);
        }
        Ok(out)
    }

    /// Copies this tensor to `device` through the dispatcher.
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        crate::ops::to(self, &TensorOptions::new().device(device))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("storage_offset", &self.storage_offset)
            .field("dtype", &self.dtype)
            .field("device", &self.device())
            .finish()
    }
}

fn checked_nbytes(elements: usize, dtype: DType) -> Result<usize> {
    elements
        .checked_mul(dtype.itemsize())
        .context(AllocationFailedSnafu { nbytes: usize::MAX })
}

/// Allocates an uninitialized-by-contract tensor from `allocator`.
pub fn empty_generic(
    size: &[usize],
    allocator: &'static dyn Allocator,
    dtype: DType,
    memory_format: Option<MemoryFormat>,
) -> Result<Tensor> {
    let strides = match memory_format.unwrap_or_default() {
        MemoryFormat::Contiguous => contiguous_strides(size),
        MemoryFormat::ChannelsLast => channels_last_strides(size).context(InvalidArgumentSnafu {
            op: "empty",
            name: "memory_format",
            reason: "channels_last requires a 4-d size",
        })?,
        MemoryFormat::Preserve => {
            return InvalidArgumentSnafu {
                op: "empty",
                name: "memory_format",
                reason: "preserve is only valid for copies",
            }
            .fail();
        }
    };
    let numel = size
        .iter()
        .try_fold(1usize, |acc, n| acc.checked_mul(*n))
        .context(AllocationFailedSnafu { nbytes: usize::MAX })?;
    let storage = Storage::new(checked_nbytes(numel, dtype)?, allocator)?;
    Ok(Tensor::from_storage(Arc::new(storage), size.to_vec(), strides, 0, dtype))
}

/// Allocates a tensor with explicit strides from `allocator`.
pub fn empty_strided_generic(
    size: &[usize],
    stride: &[usize],
    allocator: &'static dyn Allocator,
    dtype: DType,
) -> Result<Tensor> {
    ensure!(
        size.len() == stride.len(),
        InvalidArgumentSnafu {
            op: "empty_strided",
            name: "stride",
            reason: "rank differs from size",
        }
    );
    let len = storage_len_for(size, stride).context(AllocationFailedSnafu { nbytes: usize::MAX })?;
    let storage = Storage::new(checked_nbytes(len, dtype)?, allocator)?;
    Ok(Tensor::from_storage(Arc::new(storage), size.to_vec(), stride.to_vec(), 0, dtype))
}

/// Defines a CPU tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use foo_backend::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($tt:tt)+) => {{
        let (shape, data) = $crate::__tensor_parts!($($tt)+);
        $crate::tensors::Tensor::new(shape, data)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ($lit:literal) => {
        (Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::__tensor_parts!($inner) ),+ ];
        let first_shape = children[0].0.clone();
        assert!(children.iter().all(|c| c.0 == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].1.len());
        for c in children { data.extend(c.1); }
        (shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn contiguous_strides_are_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn offsets_follow_transposed_view() {
        assert_eq!(element_offsets(&[2, 3], &[1, 2], 0), vec![0, 2, 4, 1, 3, 5]);
        assert_eq!(element_offsets(&[], &[], 7), vec![7]);
        assert!(element_offsets(&[3, 0], &[1, 1], 0).is_empty());
    }

    #[test]
    fn storage_len_covers_last_element() {
        assert_eq!(storage_len_for(&[2, 3], &[3, 1]), Some(6));
        assert_eq!(storage_len_for(&[2, 3], &[1, 2]), Some(6));
        assert_eq!(storage_len_for(&[2, 0], &[1, 1]), Some(0));
        assert_eq!(storage_len_for(&[3], &[usize::MAX]), None);
    }

    #[test]
    fn empty_view_past_the_end_has_no_bytes() {
        let t = Tensor::new(vec![6], vec![0f32; 6]);
        let view = t.as_strided(&[0], &[1], 100).unwrap();
        assert_eq!(view.numel(), 0);
        assert!(view.to_bytes().unwrap().is_empty());
        view.write_bytes(&[]).unwrap();
        assert!(view.to_vec::<f32>().unwrap().is_empty());
    }

    #[test]
    fn huge_strides_are_rejected() {
        let t = Tensor::new(vec![2], vec![1u8, 2]);
        assert!(t.as_strided(&[2], &[usize::MAX], 0).is_err());
        let err =
            empty_strided_generic(&[2], &[usize::MAX], &CPU_ALLOCATOR, DType::UInt8).unwrap_err();
        assert!(matches!(err, Error::AllocationFailed { .. }));
    }

    #[test]
    fn strided_reads_and_writes() {
        let t = Tensor::new(vec![2, 3], vec![1i64, 2, 3, 4, 5, 6]);
        let transposed = t.as_strided(&[3, 2], &[1, 3], 0).unwrap();
        assert!(!transposed.is_contiguous());
        assert_eq!(transposed.to_vec::<i64>().unwrap(), vec![1, 4, 2, 5, 3, 6]);

        transposed.write_slice(&[10i64, 40, 20, 50, 30, 60]).unwrap();
        assert_eq!(t.to_vec::<i64>().unwrap(), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn wrong_element_type_is_rejected() {
        let t = Tensor::new(vec![2], vec![1.0f32, 2.0]);
        assert!(t.to_vec::<f64>().is_err());
    }

    #[test]
    fn scalar_casts() {
        assert_eq!(Scalar::from(2.9).cast::<i32>(), 2);
        assert_eq!(Scalar::from(true).cast::<f32>(), 1.0);
        assert_eq!(Scalar::from(-1).cast::<u8>(), 255);
    }

    #[test]
    fn macro_builds_nested_shapes() {
        let t = crate::tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.dtype(), DType::Float64);
        assert_eq!(t.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn channels_last_needs_four_dims() {
        let format = Some(MemoryFormat::ChannelsLast);
        assert!(empty_generic(&[2, 3], &CPU_ALLOCATOR, DType::Float32, format).is_err());
        let t = empty_generic(&[1, 3, 2, 2], &CPU_ALLOCATOR, DType::Float32, format).unwrap();
        assert_eq!(t.strides(), &[12, 1, 6, 3]);
    }
}
