use crate::{
    all_gather::{self, concat},
    all_reduce::{self, ReduceKind},
    feature_not_supported,
    group::GroupSupport,
    invalid_group_spec, protocol_violation, Blob, Buffer, CollectiveTransport, CommError,
    ReplicaGroup, ReplicaGroups, SyncToken,
};
use log::{debug, warn};
use std::{borrow::BorrowMut, sync::Arc};

/// Validates collective calls locally and hands them to a transport.
#[derive(Clone)]
pub struct CollectiveExecutor {
    transport: Arc<dyn CollectiveTransport>,
}

impl CollectiveExecutor {
    #[inline]
    pub fn new(transport: Arc<dyn CollectiveTransport>) -> Self {
        Self { transport }
    }

    #[inline]
    pub fn transport(&self) -> &dyn CollectiveTransport {
        &*self.transport
    }

    /// Reduces every buffer across the group in place and returns the same slice.
    pub fn reduce<'a, B: BorrowMut<Buffer>>(
        &self,
        kind: ReduceKind,
        buffers: &'a mut [B],
        token: SyncToken,
        scale: f64,
        groups: &ReplicaGroups,
    ) -> Result<&'a mut [B], CommError> {
        let all_reduce::Meta { layout, count } = all_reduce::Args {
            kind,
            buffers: &*buffers,
            device: token.device(),
            scale,
        }
        .meta()?;
        let group = self.group_of(groups)?;
        let staged = layout.stacked(count);
        debug!(
            "all-reduce {kind:?} x{scale} of {count} {:?}{:?} over {} replicas",
            layout.dt(),
            layout.shape(),
            group.len(),
        );

        let unit = layout.nbytes();
        let mut data = Blob::new(unit * count);
        for (dst, b) in data.chunks_exact_mut(unit.max(1)).zip(buffers.iter()) {
            dst.copy_from_slice(b.borrow().bytes())
        }

        let _guard = token.acquire();
        self.transport
            .all_reduce(group, kind, &staged, &mut data)
            .inspect_err(|e| warn!("all-reduce {kind:?} failed: {e}"))?;
        all_reduce::scale(layout.dt(), &mut data, scale)?;

        for (src, b) in data.chunks_exact(unit.max(1)).zip(buffers.iter_mut()) {
            b.borrow_mut().bytes_mut().copy_from_slice(src)
        }
        Ok(buffers)
    }

    /// Reduces a copy of `buffer`. The input is left untouched.
    pub fn reduce_value(
        &self,
        kind: ReduceKind,
        buffer: &Buffer,
        token: SyncToken,
        scale: f64,
        groups: &ReplicaGroups,
    ) -> Result<Buffer, CommError> {
        let mut ans = [buffer.clone()];
        self.reduce(kind, &mut ans, token, scale, groups)?;
        let [ans] = ans;
        Ok(ans)
    }

    pub fn gather(
        &self,
        buffer: &Buffer,
        dim: isize,
        groups: &ReplicaGroups,
        token: SyncToken,
    ) -> Result<Buffer, CommError> {
        let group = self.group_of(groups)?;
        let all_gather::Meta { dim, layout } = all_gather::Args {
            buffer,
            dim,
            device: token.device(),
            output: None,
            shards: group.len(),
        }
        .meta()?;
        let data = self.gather_blob(buffer, dim, group, token)?;
        Ok(Buffer::from_blob(layout, data, *buffer.device()))
    }

    /// Like [`gather`](Self::gather), but writes into `output` and returns it.
    pub fn gather_into<'a>(
        &self,
        buffer: &Buffer,
        dim: isize,
        groups: &ReplicaGroups,
        token: SyncToken,
        output: &'a mut Buffer,
    ) -> Result<&'a mut Buffer, CommError> {
        let group = self.group_of(groups)?;
        let all_gather::Meta { dim, .. } = all_gather::Args {
            buffer,
            dim,
            device: token.device(),
            output: Some(&*output),
            shards: group.len(),
        }
        .meta()?;
        let data = self.gather_blob(buffer, dim, group, token)?;
        output.bytes_mut().copy_from_slice(&data);
        Ok(output)
    }

    fn gather_blob(
        &self,
        buffer: &Buffer,
        dim: usize,
        group: &ReplicaGroup,
        token: SyncToken,
    ) -> Result<Blob, CommError> {
        let layout = buffer.layout();
        debug!(
            "all-gather {:?}{:?} on axis {dim} over {} replicas",
            layout.dt(),
            layout.shape(),
            group.len(),
        );
        let _guard = token.acquire();
        let pieces = self
            .transport
            .all_gather(group, layout, dim, buffer.bytes())
            .inspect_err(|e| warn!("all-gather failed: {e}"))?;
        if pieces.len() != group.len() {
            return Err(protocol_violation(format!(
                "transport returned {} pieces for {} replicas",
                pieces.len(),
                group.len()
            )));
        }
        if let Some((i, piece)) = pieces
            .iter()
            .enumerate()
            .find(|(_, piece)| piece.len() != layout.nbytes())
        {
            return Err(protocol_violation(format!(
                "piece {i} holds {} bytes, {:?}{:?} needs {}",
                piece.len(),
                layout.dt(),
                layout.shape(),
                layout.nbytes()
            )));
        }
        Ok(concat(&pieces, layout, dim))
    }

    fn group_of<'g>(&self, groups: &'g ReplicaGroups) -> Result<&'g ReplicaGroup, CommError> {
        let rank = self.transport.rank();
        let world_size = self.transport.world_size();
        if groups.world_size() != world_size {
            return Err(invalid_group_spec(format!(
                "groups span {} ranks, transport connects {world_size}",
                groups.world_size()
            )));
        }
        if !groups.is_flat() && self.transport.group_support() == GroupSupport::FlatOnly {
            return Err(feature_not_supported("transport serves a single flat group"));
        }
        groups
            .find(rank)
            .ok_or_else(|| invalid_group_spec(format!("rank {rank} is in no group")))
    }
}
