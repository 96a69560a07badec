mod args;

pub(crate) use args::{Args, Meta};

use crate::{Blob, TensorLayout};
use rayon::{iter::IndexedParallelIterator, iter::ParallelIterator, slice::ParallelSliceMut};

/// Resolves a possibly negative axis against `ndim`.
pub fn normalize_dim(dim: isize, ndim: usize) -> Option<usize> {
    let ndim = ndim as isize;
    let dim = if dim < 0 { dim + ndim } else { dim };
    (0..ndim).contains(&dim).then_some(dim as usize)
}

/// Concatenates equally shaped `pieces` along `dim`, in slice order.
pub(crate) fn concat(pieces: &[Blob], layout: &TensorLayout, dim: usize) -> Blob {
    let shape = layout.shape();
    let outer = shape[..dim].iter().product::<usize>();
    let chunk = shape[dim..].iter().product::<usize>() * layout.dt().nbytes();

    let n = pieces.len();
    let mut ans = Blob::new(outer * chunk * n);
    if chunk == 0 || n == 0 {
        return ans;
    }
    ans.par_chunks_mut(chunk * n)
        .enumerate()
        .for_each(|(o, row)| {
            for (i, piece) in pieces.iter().enumerate() {
                row[i * chunk..][..chunk].copy_from_slice(&piece[o * chunk..][..chunk])
            }
        });
    ans
}

#[test]
fn test_normalize_dim() {
    assert_eq!(normalize_dim(0, 2), Some(0));
    assert_eq!(normalize_dim(-1, 2), Some(1));
    assert_eq!(normalize_dim(-2, 2), Some(0));
    assert_eq!(normalize_dim(2, 2), None);
    assert_eq!(normalize_dim(-3, 2), None);
    assert_eq!(normalize_dim(0, 0), None);
}

#[test]
fn test_concat() {
    use crate::utils::{cast, cast_mut};
    use digit_layout::types::U32;

    let layout = TensorLayout::new_contiguous(U32, &[2, 2]);
    let pieces = [[1u32, 2, 3, 4], [5, 6, 7, 8]].map(|values| {
        let mut blob = Blob::new(16);
        cast_mut::<u32>(&mut blob).copy_from_slice(&values);
        blob
    });

    let rows = concat(&pieces, &layout, 0);
    assert_eq!(cast::<u32>(&rows), [1, 2, 3, 4, 5, 6, 7, 8]);

    let cols = concat(&pieces, &layout, 1);
    assert_eq!(cast::<u32>(&cols), [1, 2, 5, 6, 3, 4, 7, 8]);
}
