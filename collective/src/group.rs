use crate::{feature_not_supported, invalid_group_spec, CommError};

/// Ranks that jointly take part in one collective call, ascending.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReplicaGroup(Box<[usize]>);

impl ReplicaGroup {
    #[inline]
    pub fn ranks(&self) -> &[usize] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of `rank` within the group, which is also its slot in gathered output.
    #[inline]
    pub fn position(&self, rank: usize) -> Option<usize> {
        self.0.binary_search(&rank).ok()
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.0[0]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GroupSupport {
    FlatOnly,
    Partitioned,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReplicaGroups {
    groups: Box<[ReplicaGroup]>,
    world_size: usize,
}

impl ReplicaGroups {
    pub fn flat(world_size: usize) -> Result<Self, CommError> {
        if world_size == 0 {
            return Err(invalid_group_spec("world size must be positive"));
        }
        Ok(Self {
            groups: Box::new([ReplicaGroup((0..world_size).collect())]),
            world_size,
        })
    }

    /// Validates `requested` as a partition of `[0, world_size)`.
    pub fn resolve(
        requested: Option<&[Vec<usize>]>,
        world_size: usize,
        support: GroupSupport,
    ) -> Result<Self, CommError> {
        let flat = Self::flat(world_size)?;
        let Some(requested) = requested else {
            return Ok(flat);
        };
        if requested.is_empty() {
            return Err(invalid_group_spec("no groups given"));
        }

        let mut owner = vec![None::<usize>; world_size];
        let mut groups = Vec::with_capacity(requested.len());
        for (i, group) in requested.iter().enumerate() {
            if group.is_empty() {
                return Err(invalid_group_spec(format!("group {i} is empty")));
            }
            for &rank in group {
                let Some(slot) = owner.get_mut(rank) else {
                    return Err(invalid_group_spec(format!(
                        "rank {rank} in group {i} is out of [0, {world_size})"
                    )));
                };
                if let Some(j) = slot.replace(i) {
                    return Err(invalid_group_spec(format!(
                        "rank {rank} appears in group {j} and group {i}"
                    )));
                }
            }
            let mut ranks = group.clone();
            ranks.sort_unstable();
            groups.push(ReplicaGroup(ranks.into()));
        }
        if let Some(missing) = owner.iter().position(Option::is_none) {
            return Err(invalid_group_spec(format!("rank {missing} is in no group")));
        }

        let ans = Self {
            groups: groups.into(),
            world_size,
        };
        if support == GroupSupport::FlatOnly && ans != flat {
            return Err(feature_not_supported(format!(
                "custom replica groups {requested:?}"
            )));
        }
        Ok(ans)
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    #[inline]
    pub fn groups(&self) -> &[ReplicaGroup] {
        &self.groups
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        self.groups.len() == 1
    }

    pub fn find(&self, rank: usize) -> Option<&ReplicaGroup> {
        self.groups.iter().find(|g| g.position(rank).is_some())
    }
}
