use crate::{
    device::Device,
    type_not_support,
    utils::{cast, cast_mut},
    Blob, CommError, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};

/// Scalar types a [`Buffer`] can be viewed as.
pub trait Element: Copy + Send + Sync + 'static {
    const DT: DigitLayout;
}

macro_rules! element {
    ($( $dt:ident => $ty:ty )+) => {
        $( impl Element for $ty { const DT: DigitLayout = ty::$dt; } )+
    };
}

element! {
    U8   => u8
    I8   => i8
    U16  => u16
    I16  => i16
    U32  => u32
    I32  => i32
    U64  => u64
    I64  => i64
    F16  => f16
    BF16 => bf16
    F32  => f32
    F64  => f64
}

/// Device-resident tensor data. Always contiguous.
#[derive(Clone, Debug)]
pub struct Buffer {
    layout: TensorLayout,
    device: Device,
    data: Blob,
}

impl Buffer {
    pub fn zeros(dt: DigitLayout, shape: &[usize], device: Device) -> Self {
        let layout = TensorLayout::new_contiguous(dt, shape);
        let data = Blob::new(layout.nbytes());
        Self {
            layout,
            device,
            data,
        }
    }

    /// Copies `values` into a new buffer of the given shape.
    pub fn from_slice<T: Element>(
        values: &[T],
        shape: &[usize],
        device: Device,
    ) -> Result<Self, CommError> {
        let mut ans = Self::zeros(T::DT, shape, device);
        let len = ans.layout.nelements();
        if values.len() != len {
            return Err(crate::invalid_argument(format!(
                "{} values for shape {shape:?}",
                values.len()
            )));
        }
        cast_mut::<T>(&mut ans.data).copy_from_slice(values);
        Ok(ans)
    }

    pub(crate) fn from_blob(layout: TensorLayout, data: Blob, device: Device) -> Self {
        debug_assert_eq!(layout.nbytes(), data.len());
        Self {
            layout,
            device,
            data,
        }
    }

    #[inline]
    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        self.layout.dt()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T], CommError> {
        if T::DT != self.dt() {
            return Err(type_not_support(format!(
                "buffer holds {:?}, viewed as {:?}",
                self.dt(),
                T::DT
            )));
        }
        Ok(cast(&self.data))
    }

    pub fn as_slice_mut<T: Element>(&mut self) -> Result<&mut [T], CommError> {
        if T::DT != self.dt() {
            return Err(type_not_support(format!(
                "buffer holds {:?}, viewed as {:?}",
                self.dt(),
                T::DT
            )));
        }
        Ok(cast_mut(&mut self.data))
    }

    #[inline]
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, CommError> {
        self.as_slice().map(<[T]>::to_vec)
    }
}

#[test]
fn test_buffer() {
    let buf = Buffer::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2], Device::cpu()).unwrap();
    assert_eq!(buf.shape(), &[2, 2]);
    assert_eq!(buf.bytes().len(), 16);
    assert_eq!(buf.to_vec::<f32>().unwrap(), [1.0, 2.0, 3.0, 4.0]);
    assert!(buf.as_slice::<u32>().is_err());
    assert!(Buffer::from_slice(&[1u8, 2, 3], &[2, 2], Device::cpu()).is_err());
}
