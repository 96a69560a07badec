use digit_layout::DigitLayout;
use ndarray_layout::ArrayLayout;

/// Data type and contiguous row-major shape of a buffer.
#[derive(Clone)]
pub struct TensorLayout {
    dt: DigitLayout,
    layout: ArrayLayout<4>,
}

impl TensorLayout {
    pub fn new_contiguous(dt: DigitLayout, shape: &[usize]) -> Self {
        let mut strides = shape
            .iter()
            .rev()
            .scan(dt.nbytes() as isize, |mul, &d| {
                let stride = *mul;
                *mul *= d as isize;
                Some(stride)
            })
            .collect::<Vec<_>>();
        strides.reverse();
        Self {
            dt,
            layout: ArrayLayout::new(shape, &strides, 0),
        }
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.dt
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    #[inline]
    pub fn nelements(&self) -> usize {
        self.shape().iter().product()
    }

    #[inline]
    pub fn nbytes(&self) -> usize {
        self.nelements() * self.dt.nbytes()
    }

    /// Same dtype and shape.
    #[inline]
    pub fn matches(&self, other: &Self) -> bool {
        self.dt == other.dt && self.shape() == other.shape()
    }

    /// Layout with one more leading axis of length `n`.
    pub fn stacked(&self, n: usize) -> Self {
        let mut shape = Vec::with_capacity(self.ndim() + 1);
        shape.push(n);
        shape.extend_from_slice(self.shape());
        Self::new_contiguous(self.dt, &shape)
    }

    /// Layout with axis `dim` multiplied by `n`.
    pub fn repeated(&self, dim: usize, n: usize) -> Self {
        let mut shape = self.shape().to_vec();
        shape[dim] *= n;
        Self::new_contiguous(self.dt, &shape)
    }
}

impl std::fmt::Debug for TensorLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorLayout")
            .field("dt", &self.dt)
            .field("shape", &self.shape())
            .field("strides", &self.strides())
            .finish()
    }
}

#[test]
fn test_layout() {
    use digit_layout::types::F32;

    let layout = TensorLayout::new_contiguous(F32, &[2, 3, 4]);
    assert_eq!(layout.strides(), &[48, 16, 4]);
    assert_eq!(layout.nbytes(), 96);
    assert_eq!(layout.stacked(5).shape(), &[5, 2, 3, 4]);
    assert_eq!(layout.repeated(1, 2).shape(), &[2, 6, 4]);

    let scalar = TensorLayout::new_contiguous(F32, &[]);
    assert_eq!(scalar.nelements(), 1);
    assert_eq!(scalar.nbytes(), 4);
}
