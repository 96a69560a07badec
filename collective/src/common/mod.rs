mod blob;
mod error;
mod tensor;

pub use blob::Blob;
pub use error::{functions::*, CommError, CommErrorKind};
pub use tensor::TensorLayout;

pub mod utils {
    use super::{shape_mismatch, CommError, TensorLayout};
    use std::slice::{from_raw_parts, from_raw_parts_mut};

    /// Reinterprets aligned bytes as a slice of `T`.
    #[inline]
    pub(crate) fn cast<T>(bytes: &[u8]) -> &[T] {
        debug_assert_eq!(bytes.as_ptr() as usize % align_of::<T>(), 0);
        unsafe { from_raw_parts(bytes.as_ptr().cast(), bytes.len() / size_of::<T>()) }
    }

    #[inline]
    pub(crate) fn cast_mut<T>(bytes: &mut [u8]) -> &mut [T] {
        debug_assert_eq!(bytes.as_ptr() as usize % align_of::<T>(), 0);
        unsafe { from_raw_parts_mut(bytes.as_mut_ptr().cast(), bytes.len() / size_of::<T>()) }
    }

    #[inline]
    pub(crate) fn layout_distinct<'a>(
        layouts: impl IntoIterator<Item = &'a TensorLayout>,
    ) -> Result<Option<&'a TensorLayout>, CommError> {
        let mut layouts = layouts.into_iter();
        let Some(first) = layouts.next() else {
            return Ok(None);
        };
        for it in layouts {
            if !it.matches(first) {
                return Err(shape_mismatch(format!(
                    "{:?}{:?} vs {:?}{:?}",
                    first.dt(),
                    first.shape(),
                    it.dt(),
                    it.shape(),
                )));
            }
        }
        Ok(Some(first))
    }
}
