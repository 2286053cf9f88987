//! Shared fixtures for the integration tests: builds minimal, internally
//! consistent log/blk pool images using the crate's own codec, so each
//! test only needs to corrupt the one field it's exercising.

#![allow(dead_code)]

use std::path::Path;

use pmempool_check::codec::{self, BttFlog, BttInfo, PoolHdr, PoolType, BLK_FORMAT_MAJOR};

pub const ARENA_SIZE: u64 = 64 * 1024;
pub const BLK_BTT_START: u64 = 4096;
pub const EXTERNAL_LBASIZE: u32 = 512;
pub const NFREE: u32 = 4;

pub fn build_log_pool(path: &Path, start: u64, end: u64, write: u64, data_size: u64) {
    let mut hdr = codec::default_pool_hdr(PoolType::Log);
    hdr.uuid = [1; 16];
    hdr.poolset_uuid = [1; 16];
    codec::pool_hdr_set_checksum(&mut hdr);

    let mut bytes = codec::encode(&hdr);
    bytes.resize(codec::POOL_HDR_SIZE, 0);

    let mut cursors = Vec::with_capacity(24);
    cursors.extend_from_slice(&start.to_le_bytes());
    cursors.extend_from_slice(&end.to_le_bytes());
    cursors.extend_from_slice(&write.to_le_bytes());

    bytes.extend_from_slice(&cursors);
    bytes.resize(codec::POOL_HDR_SIZE + data_size as usize, 0);
    std::fs::write(path, bytes).unwrap();
}

pub struct BlkPool {
    pub info: BttInfo,
    /// Absolute byte offset of the arena's primary BTT info header.
    pub arena_offset: u64,
}

/// Builds a single-part blk pool with one fully-initialized BTT arena: an
/// identity map over the external LBAs, `nfree` free internal blocks
/// parked in the flog, and a clean backup info header. Tests corrupt
/// exactly the one field they care about on top of this baseline.
pub fn build_blk_pool(path: &Path, bsize: u32, corrupt_primary: bool) -> BlkPool {
    let mut hdr = codec::default_pool_hdr(PoolType::Blk);
    hdr.uuid = [2; 16];
    hdr.poolset_uuid = [2; 16];
    codec::pool_hdr_set_checksum(&mut hdr);

    let mut info = BttInfo { sig: *codec::SIG_BTT_INFO, ..BttInfo::default() };
    info.uuid = [3; 16];
    info.parent_uuid = hdr.uuid;
    info.major = BLK_FORMAT_MAJOR as u16;
    codec::btt_info_set(&mut info, EXTERNAL_LBASIZE, NFREE, ARENA_SIZE, 0).unwrap();
    codec::btt_info_set_checksum(&mut info);

    let total = codec::POOL_HDR_SIZE as u64 + BLK_BTT_START + ARENA_SIZE;
    let mut buf = vec![0u8; total as usize];

    let hdr_bytes = codec::encode(&hdr);
    buf[0..hdr_bytes.len()].copy_from_slice(&hdr_bytes);

    let blk_off = codec::POOL_HDR_SIZE;
    buf[blk_off..blk_off + 4].copy_from_slice(&bsize.to_le_bytes());

    let arena_offset = codec::POOL_HDR_SIZE as u64 + BLK_BTT_START;
    let mut info_bytes = codec::encode(&info);
    if corrupt_primary {
        info_bytes[20] ^= 0xff; // inside `flags`, after sig/uuid/parent_uuid
    }
    let info_off = arena_offset as usize;
    buf[info_off..info_off + info_bytes.len()].copy_from_slice(&info_bytes);

    // Identity map over the external LBAs; the remaining internal blocks
    // (the free pool) are not represented in the map at all — they're
    // tracked by the flog below.
    let external_nlba = info.external_nlba as usize;
    let map: Vec<u32> = (0..external_nlba as u32).collect();
    let map_bytes = codec::btt_map_to_le(&map);
    let map_off = (arena_offset + info.mapoff) as usize;
    buf[map_off..map_off + map_bytes.len()].copy_from_slice(&map_bytes);

    // One flog pair per free block, parked (old_map == new_map, seq 1)
    // with its sibling slot zeroed, a legitimate just-initialized state.
    let pair_size = codec::round_up(2 * std::mem::size_of::<BttFlog>() as u64, codec::BTT_FLOG_PAIR_ALIGN) as usize;
    let flog_off = (arena_offset + info.flogoff) as usize;
    for i in 0..info.nfree as usize {
        let block = (external_nlba + i) as u32;
        let a = BttFlog { lba: 0, old_map: block, new_map: block, seq: 1, reserved: [0; 16] };
        let b = BttFlog::default();
        let pair_start = flog_off + i * pair_size;
        let a_bytes = codec::encode(&a);
        let b_bytes = codec::encode(&b);
        buf[pair_start..pair_start + a_bytes.len()].copy_from_slice(&a_bytes);
        buf[pair_start + a_bytes.len()..pair_start + a_bytes.len() + b_bytes.len()].copy_from_slice(&b_bytes);
    }

    // Clean backup info header at the arena's trailing 4 KiB.
    let backup_bytes = codec::encode(&info);
    let backup_off = (arena_offset + ARENA_SIZE - codec::BTT_INFO_SIZE as u64) as usize;
    buf[backup_off..backup_off + backup_bytes.len()].copy_from_slice(&backup_bytes);

    std::fs::write(path, &buf).unwrap();
    BlkPool { info, arena_offset }
}
