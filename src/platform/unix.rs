//! Unix page mapping via mmap/munmap/madvise.

use crate::config::PAGE_SIZE;
use core::ffi::c_void;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;
const MADV_DONTNEED: i32 = 4;

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;

    fn madvise(addr: *mut c_void, length: usize, advice: i32) -> i32;
}

pub fn map_page() -> *mut u8 {
    // mmap only guarantees alignment to the system page size, which may be
    // smaller than PAGE_SIZE on some platforms. Over-allocate and trim; on
    // hosts where the native page size already equals PAGE_SIZE (the common
    // case on Linux/macOS at 4096) the trims are both zero-length.
    let raw = unsafe {
        mmap(
            core::ptr::null_mut(),
            PAGE_SIZE * 2,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        return core::ptr::null_mut();
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

    let lead = aligned_addr - raw_addr;
    if lead > 0 {
        unsafe { munmap(raw_addr as *mut c_void, lead) };
    }

    let trail = (raw_addr + PAGE_SIZE * 2) - (aligned_addr + PAGE_SIZE);
    if trail > 0 {
        unsafe { munmap((aligned_addr + PAGE_SIZE) as *mut c_void, trail) };
    }

    aligned_addr as *mut u8
}

pub unsafe fn unmap_page(ptr: *mut u8) {
    unsafe { munmap(ptr as *mut c_void, PAGE_SIZE) };
}

pub unsafe fn hint_not_needed(ptr: *mut u8) -> bool {
    unsafe { madvise(ptr as *mut c_void, PAGE_SIZE, MADV_DONTNEED) == 0 }
}
