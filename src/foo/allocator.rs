//! Allocator for the `foo` backend.
//!
//! `foo` has no memory of its own: blocks come from the host heap through
//! [`alloc_cpu`], which keeps `foo` tensors byte-compatible with CPU tensors.
//! They are tagged with the calling thread's active `foo` device (index 0 if
//! none is set) and freed through [`report_and_delete`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::alloc::{Allocator, DataPtr, DeleterFn, alloc_cpu, default_copy_data, free_cpu};
use crate::backend::Device;
use crate::diagnostics::{Diagnostic, report};
use crate::error::Result;

use super::guard_impl::current_device;

static REPORT_ALLOCATIONS: AtomicBool = AtomicBool::new(true);

pub(crate) fn set_report_allocations(enabled: bool) {
    REPORT_ALLOCATIONS.store(enabled, Ordering::Relaxed);
}

fn reporting() -> bool {
    REPORT_ALLOCATIONS.load(Ordering::Relaxed)
}

/// Frees a block from [`FooAllocator`]. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live block returned by `FooAllocator::allocate`.
pub unsafe fn report_and_delete(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if reporting() {
        report(Diagnostic::Free { ptr: ptr as usize });
    }
    unsafe { free_cpu(ptr) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FooAllocator;

impl Allocator for FooAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        let device = Device::privateuse1(current_device().unwrap_or(0));
        let ptr = alloc_cpu(nbytes)?;
        if reporting() {
            report(Diagnostic::Allocate { device, nbytes, ptr: ptr as usize });
        }
        Ok(unsafe { DataPtr::from_raw(ptr, nbytes, device, report_and_delete) })
    }

    fn raw_deleter(&self) -> Option<DeleterFn> {
        Some(report_and_delete)
    }

    fn copy_data(&self, dest: &mut [u8], src: &[u8], count: usize) -> Result<()> {
        default_copy_data(dest, src, count)
    }

    fn name(&self) -> &str {
        "foo"
    }
}

pub static FOO_ALLOCATOR: FooAllocator = FooAllocator;
