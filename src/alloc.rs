//! Raw memory allocation and the per-device allocator slot.
//!
//! Storage never allocates directly. It asks the allocator registered for its
//! device type, receives a [`DataPtr`], and hands the block back through the
//! `DataPtr`'s deleter when the last reference goes away. The deleter is a
//! plain function pointer, so a block can be freed long after (and on a
//! different thread than) the allocator call that produced it.
//!
//! Host blocks are 64-byte aligned and carry a small header recording their
//! layout, which is what lets [`free_cpu`] work from the pointer alone.

use core::fmt;
use std::alloc::{self, Layout};
use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use snafu::{OptionExt, ensure};

use crate::backend::{Device, DeviceType};
use crate::error::{
    AllocationFailedSnafu, AlreadyRegisteredSnafu, NotRegisteredSnafu, Result, SizeMismatchSnafu,
};

/// Alignment of every host allocation, and size of the block header.
pub const ALIGNMENT: usize = 64;

/// Frees a block produced by a paired allocator.
///
/// Deleters must treat a null pointer as a no-op.
pub type DeleterFn = unsafe fn(*mut u8);

/// An owned raw memory block tagged with the device it belongs to.
///
/// Dropping a `DataPtr` runs its deleter exactly once.
pub struct DataPtr {
    ptr: *mut u8,
    nbytes: usize,
    device: Device,
    deleter: DeleterFn,
}

// The block is uniquely owned; access goes through `&`/`&mut` on the DataPtr.
unsafe impl Send for DataPtr {}
unsafe impl Sync for DataPtr {}

impl DataPtr {
    /// Wraps a raw block.
    ///
    /// # Safety
    /// `ptr` must be null (with `nbytes == 0`) or valid for reads and writes
    /// of `nbytes` bytes, and `deleter` must be the function that frees it.
    pub unsafe fn from_raw(
        ptr: *mut u8,
        nbytes: usize,
        device: Device,
        deleter: DeleterFn,
    ) -> Self {
        Self { ptr, nbytes, device, deleter }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn deleter(&self) -> DeleterFn {
        self.deleter
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() || self.nbytes == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.nbytes) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        if self.ptr.is_null() || self.nbytes == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.nbytes) }
    }

    /// Releases ownership without running the deleter.
    ///
    /// The caller becomes responsible for passing the pointer to
    /// [`DataPtr::deleter`].
    pub fn into_raw(self) -> *mut u8 {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for DataPtr {
    fn drop(&mut self) {
        unsafe { (self.deleter)(self.ptr) }
    }
}

impl fmt::Debug for DataPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPtr")
            .field("ptr", &self.ptr)
            .field("nbytes", &self.nbytes)
            .field("device", &self.device)
            .finish()
    }
}

/// Memory provider for one device type.
pub trait Allocator: Send + Sync {
    /// Returns a block of at least `nbytes` bytes.
    fn allocate(&self, nbytes: usize) -> Result<DataPtr>;

    /// Deleter usable without an allocator instance, if the allocator has one.
    fn raw_deleter(&self) -> Option<DeleterFn> {
        None
    }

    /// Copies `count` bytes from `src` to `dest`.
    ///
    /// Neither side has to belong to this allocator.
    fn copy_data(&self, dest: &mut [u8], src: &[u8], count: usize) -> Result<()> {
        default_copy_data(dest, src, count)
    }

    fn name(&self) -> &str;
}

/// Byte-for-byte copy of the first `count` bytes.
pub fn default_copy_data(dest: &mut [u8], src: &[u8], count: usize) -> Result<()> {
    ensure!(src.len() >= count, SizeMismatchSnafu { expected: count, actual: src.len() });
    ensure!(dest.len() >= count, SizeMismatchSnafu { expected: count, actual: dest.len() });
    dest[..count].copy_from_slice(&src[..count]);
    Ok(())
}

/// Allocates `nbytes` of zeroed, 64-byte aligned host memory.
///
/// Returns a null pointer for `nbytes == 0`.
pub fn alloc_cpu(nbytes: usize) -> Result<*mut u8> {
    if nbytes == 0 {
        return Ok(std::ptr::null_mut());
    }
    let total = nbytes.checked_add(ALIGNMENT).context(AllocationFailedSnafu { nbytes })?;
    let layout = Layout::from_size_align(total, ALIGNMENT)
        .map_err(|_| AllocationFailedSnafu { nbytes }.build())?;

    let base = unsafe { alloc::alloc_zeroed(layout) };
    ensure!(!base.is_null(), AllocationFailedSnafu { nbytes });
    unsafe {
        base.cast::<usize>().write(total);
        Ok(base.add(ALIGNMENT))
    }
}

/// Frees memory returned by [`alloc_cpu`]. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a pointer returned by `alloc_cpu` that has not been
/// freed yet.
pub unsafe fn free_cpu(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let base = ptr.sub(ALIGNMENT);
        let total = base.cast::<usize>().read();
        alloc::dealloc(base, Layout::from_size_align_unchecked(total, ALIGNMENT));
    }
}

/// Allocator of the reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAllocator;

impl Allocator for CpuAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        let ptr = alloc_cpu(nbytes)?;
        Ok(unsafe { DataPtr::from_raw(ptr, nbytes, Device::cpu(), free_cpu) })
    }

    fn raw_deleter(&self) -> Option<DeleterFn> {
        Some(free_cpu)
    }

    fn name(&self) -> &str {
        "CPU"
    }
}

pub static CPU_ALLOCATOR: CpuAllocator = CpuAllocator;

lazy_static! {
    static ref ALLOCATORS: RwLock<HashMap<DeviceType, &'static dyn Allocator>> = {
        let mut slots: HashMap<DeviceType, &'static dyn Allocator> = HashMap::new();
        slots.insert(DeviceType::Cpu, &CPU_ALLOCATOR);
        RwLock::new(slots)
    };
}

/// Installs the allocator for `device_type`. Each slot can be filled once.
pub fn register_allocator(
    device_type: DeviceType,
    allocator: &'static dyn Allocator,
) -> Result<()> {
    let mut slots = ALLOCATORS.write();
    ensure!(
        !slots.contains_key(&device_type),
        AlreadyRegisteredSnafu { slot: "allocator", device_type: device_type.to_string() }
    );
    slots.insert(device_type, allocator);
    Ok(())
}

/// Looks up the allocator registered for `device_type`.
pub fn get_allocator(device_type: DeviceType) -> Result<&'static dyn Allocator> {
    ALLOCATORS
        .read()
        .get(&device_type)
        .copied()
        .context(NotRegisteredSnafu { slot: "allocator", device_type: device_type.to_string() })
}
