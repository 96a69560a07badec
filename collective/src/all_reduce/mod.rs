mod args;
mod combine;

pub(crate) use args::{Args, Meta};
pub(crate) use combine::{combine, scale};

/// Commutative, associative operator applied across replicas.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ReduceKind {
    Sum,
    Mul,
    And,
    Or,
    Min,
    Max,
}
