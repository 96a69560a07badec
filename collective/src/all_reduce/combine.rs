use super::ReduceKind::{self, *};
use crate::{
    type_not_support,
    utils::{cast, cast_mut},
    CommError,
};
use digit_layout::{types as ty, DigitLayout};
use half::{bf16, f16};
use rayon::iter::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};

trait Arith: Copy + PartialOrd + Send + Sync {
    fn add(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;

    #[inline]
    fn min(self, rhs: Self) -> Self {
        if rhs < self {
            rhs
        } else {
            self
        }
    }

    #[inline]
    fn max(self, rhs: Self) -> Self {
        if rhs > self {
            rhs
        } else {
            self
        }
    }
}

trait Bitwise: Arith {
    fn and(self, rhs: Self) -> Self;
    fn or(self, rhs: Self) -> Self;
}

trait Float: Arith {
    fn scale(self, s: f64) -> Self;
}

macro_rules! impl_int {
    ($( $ty:ty )+) => {
        $(
            impl Arith for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }
                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }
            }

            impl Bitwise for $ty {
                #[inline]
                fn and(self, rhs: Self) -> Self {
                    self & rhs
                }
                #[inline]
                fn or(self, rhs: Self) -> Self {
                    self | rhs
                }
            }
        )+
    };
}

macro_rules! impl_float {
    ($( $ty:ty => $s:ident: $from:expr )+) => {
        $(
            impl Arith for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }
                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }
            }

            impl Float for $ty {
                #[inline]
                fn scale(self, $s: f64) -> Self {
                    self * $from
                }
            }
        )+
    };
}

impl_int! { u8 i8 u16 i16 u32 i32 u64 i64 }
impl_float! {
    f16  => s: f16::from_f64(s)
    bf16 => s: bf16::from_f64(s)
    f32  => s: s as f32
    f64  => s: s
}

macro_rules! dispatch {
    ($dt:expr;
     int: $( $i:ident => $it:ty )+;
     float: $( $f:ident => $ft:ty )+;
     $int_arm:ident, $float_arm:ident, $other:expr) => {
        match $dt {
            $( ty::$i => $int_arm!($it), )+
            $( ty::$f => $float_arm!($ft), )+
            _ => $other,
        }
    };
}

macro_rules! for_each_dt {
    ($dt:expr, $int_arm:ident, $float_arm:ident, $other:expr) => {
        dispatch! {
            $dt;
            int:   U8 => u8  I8 => i8  U16 => u16  I16 => i16
                   U32 => u32  I32 => i32  U64 => u64  I64 => i64;
            float: F16 => f16  BF16 => bf16  F32 => f32  F64 => f64;
            $int_arm, $float_arm, $other
        }
    };
}

pub(super) fn is_float(dt: DigitLayout) -> bool {
    macro_rules! no {
        ($ty:ty) => {
            false
        };
    }
    macro_rules! yes {
        ($ty:ty) => {
            true
        };
    }
    for_each_dt!(dt, no, yes, false)
}

pub(super) fn supports(kind: ReduceKind, dt: DigitLayout) -> bool {
    macro_rules! int {
        ($ty:ty) => {
            true
        };
    }
    macro_rules! float {
        ($ty:ty) => {
            !matches!(kind, And | Or)
        };
    }
    for_each_dt!(dt, int, float, false)
}

/// `dst[i] = dst[i] <kind> src[i]`.
pub(crate) fn combine(
    kind: ReduceKind,
    dt: DigitLayout,
    dst: &mut [u8],
    src: &[u8],
) -> Result<(), CommError> {
    debug_assert_eq!(dst.len(), src.len());
    macro_rules! int {
        ($ty:ty) => {
            combine_int::<$ty>(kind, cast_mut(dst), cast(src))
        };
    }
    macro_rules! float {
        ($ty:ty) => {
            combine_float::<$ty>(kind, cast_mut(dst), cast(src))
        };
    }
    for_each_dt!(
        dt,
        int,
        float,
        Err(type_not_support(format!("{kind:?} on {dt:?}")))
    )
}

/// `data[i] *= s`. A unit scale is a no-op for every dtype.
pub(crate) fn scale(dt: DigitLayout, data: &mut [u8], s: f64) -> Result<(), CommError> {
    if s == 1. {
        return Ok(());
    }
    macro_rules! int {
        ($ty:ty) => {
            Err(type_not_support(format!("scaling {dt:?} by {s}")))
        };
    }
    macro_rules! float {
        ($ty:ty) => {{
            cast_mut::<$ty>(data)
                .par_iter_mut()
                .for_each(|x| *x = x.scale(s));
            Ok(())
        }};
    }
    for_each_dt!(
        dt,
        int,
        float,
        Err(type_not_support(format!("scaling {dt:?} by {s}")))
    )
}

fn combine_int<T: Bitwise>(kind: ReduceKind, dst: &mut [T], src: &[T]) -> Result<(), CommError> {
    match kind {
        Sum => zip_with(dst, src, T::add),
        Mul => zip_with(dst, src, T::mul),
        And => zip_with(dst, src, T::and),
        Or => zip_with(dst, src, T::or),
        Min => zip_with(dst, src, <T as Arith>::min),
        Max => zip_with(dst, src, <T as Arith>::max),
    }
    Ok(())
}

fn combine_float<T: Float>(kind: ReduceKind, dst: &mut [T], src: &[T]) -> Result<(), CommError> {
    match kind {
        Sum => zip_with(dst, src, T::add),
        Mul => zip_with(dst, src, T::mul),
        Min => zip_with(dst, src, <T as Arith>::min),
        Max => zip_with(dst, src, <T as Arith>::max),
        And | Or => return Err(type_not_support(format!("{kind:?} on floating point"))),
    }
    Ok(())
}

#[inline]
fn zip_with<T: Arith>(dst: &mut [T], src: &[T], f: impl Fn(T, T) -> T + Sync + Send) {
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(d, &s)| *d = f(*d, s));
}
