use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// Owned host bytes aligned for every supported element type.
#[derive(Debug)]
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// Allocates `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        if size == 0 {
            return Self {
                ptr: NonNull::<usize>::dangling().cast(),
                len: 0,
            };
        }
        let layout = layout(size);
        match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(ptr) => Self { ptr, len: size },
            None => handle_alloc_error(layout),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut ans = Self::new(bytes.len());
        ans.copy_from_slice(bytes);
        ans
    }
}

impl Clone for Blob {
    #[inline]
    fn clone(&self) -> Self {
        Self::from_bytes(self)
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        if len > 0 {
            unsafe { dealloc(ptr.as_ptr(), layout(len)) }
        }
    }
}

#[inline(always)]
const fn layout(size: usize) -> Layout {
    unsafe { Layout::from_size_align_unchecked(size, align_of::<u64>()) }
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_blob() {
    let empty = Blob::new(0);
    assert!(empty.is_empty());

    let blob = Blob::from_bytes(&[1, 2, 3]);
    assert_eq!(blob.as_ptr() as usize % align_of::<u64>(), 0);
    assert_eq!(&*blob.clone(), &[1, 2, 3]);
}
