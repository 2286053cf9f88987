#![allow(dead_code)]
//! Pool-data facade (C3): typed reads of pool/log/blk/BTT structures over
//! a replica, independent of which part a given offset lands in.

use crate::codec::{
    self, BttInfo, PoolType, BTT_ALIGNMENT, BTT_INFO_SIZE, BTT_MAX_ARENA, POOL_HDR_SIZE,
};
use crate::poolset::PoolSet;

/// Minimum total file size per pool type, used to reject obviously
/// truncated pools before the check driver runs.
pub fn min_size(pool_type: PoolType) -> u64 {
    match pool_type {
        PoolType::Log => POOL_HDR_SIZE as u64 + codec::LOG_FORMAT_DATA_ALIGN,
        PoolType::Blk | PoolType::BttDev => POOL_HDR_SIZE as u64 + 2 * BTT_INFO_SIZE as u64,
        PoolType::Obj => POOL_HDR_SIZE as u64,
        PoolType::Unknown => POOL_HDR_SIZE as u64,
    }
}

/// Reads a `BttInfo` candidate at `offset` in the replica's data region
/// and reports whether its checksum validates.
pub fn read_btt_info(set: &mut PoolSet, replica: usize, offset: u64) -> anyhow::Result<BttInfo> {
    let bytes = set.read(replica, offset, BTT_INFO_SIZE as u64)?;
    codec::decode(&bytes)
}

pub fn btt_info_is_valid_at(set: &mut PoolSet, replica: usize, offset: u64) -> bool {
    match read_btt_info(set, replica, offset) {
        Ok(info) => codec::btt_info_checksum_valid(&info),
        Err(_) => false,
    }
}

/// Policy for the next arena's file offset: the current arena's `nextoff`
/// field when non-zero, capped at the arena maximum and at replica end.
pub fn next_arena_offset(set: &mut PoolSet, replica: usize, header_offset: u64) -> u64 {
    let total = set.replicas[replica].data_size();
    let capped = header_offset.saturating_add(BTT_MAX_ARENA).min(total);
    codec::round_down(capped, BTT_ALIGNMENT)
}

/// Scans forward from `start` for the first offset holding a structurally
/// valid `BttInfo`, used to recover a parent UUID/geometry donor when the
/// pool header itself is unusable (spec §4.3 "first valid BTT info").
pub fn first_valid_btt_info(
    set: &mut PoolSet,
    replica: usize,
    start: u64,
) -> anyhow::Result<Option<(u64, BttInfo)>> {
    let total = set.replicas[replica].data_size();
    let mut offset = codec::round_down(start, BTT_ALIGNMENT);
    while offset + BTT_INFO_SIZE as u64 <= total {
        if let Ok(info) = read_btt_info(set, replica, offset) {
            if codec::btt_info_checksum_valid(&info) {
                return Ok(Some((offset, info)));
            }
        }
        offset += BTT_ALIGNMENT;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_size_orders_by_type() {
        assert!(min_size(PoolType::Blk) > min_size(PoolType::Log));
    }
}
