#[cfg(any(feature = "inproc", test))]
mod inproc;
#[cfg(any(feature = "inproc", test))]
pub use inproc::InprocNode;

use crate::{
    all_reduce::ReduceKind, group::GroupSupport, Blob, CommError, ReplicaGroup, TensorLayout,
};
use std::sync::Arc;

/// A replica's endpoint into cross-replica communication.
pub trait CollectiveTransport: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    #[inline]
    fn group_support(&self) -> GroupSupport {
        GroupSupport::FlatOnly
    }

    fn all_reduce(
        &self,
        group: &ReplicaGroup,
        kind: ReduceKind,
        layout: &TensorLayout,
        data: &mut [u8],
    ) -> Result<(), CommError>;

    /// Collects the contribution of every group member, indexed by group position.
    fn all_gather(
        &self,
        group: &ReplicaGroup,
        layout: &TensorLayout,
        dim: usize,
        data: &[u8],
    ) -> Result<Arc<[Blob]>, CommError>;
}

/// The only replica of a one-replica world. Every collective is local.
#[derive(Clone, Copy, Default, Debug)]
pub struct Solo;

impl CollectiveTransport for Solo {
    #[inline]
    fn rank(&self) -> usize {
        0
    }

    #[inline]
    fn world_size(&self) -> usize {
        1
    }

    #[inline]
    fn all_reduce(
        &self,
        _group: &ReplicaGroup,
        _kind: ReduceKind,
        _layout: &TensorLayout,
        _data: &mut [u8],
    ) -> Result<(), CommError> {
        Ok(())
    }

    #[inline]
    fn all_gather(
        &self,
        _group: &ReplicaGroup,
        _layout: &TensorLayout,
        _dim: usize,
        data: &[u8],
    ) -> Result<Arc<[Blob]>, CommError> {
        Ok(Arc::from(vec![Blob::from_bytes(data)]))
    }
}
