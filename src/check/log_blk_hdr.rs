//! Log/blk header check (C6): canonicalizes the log pool's write cursors
//! and validates the blk pool's block size. Both sets of fields live in
//! the first bytes of a replica's data region, immediately following the
//! common 4 KiB pool header (a deliberate simplification documented in
//! DESIGN.md: the real on-disk layouts embed them inside the header page
//! itself, which our fixed-size `PoolHdr` struct has no room left for).

use super::{PendingFix, Session};
use crate::codec::{self, PoolType, BTT_ALIGNMENT, MIN_LBA_SIZE};
use crate::error::CheckError;
use crate::pooldata;

/// Start of BTT arena 0 within a blk replica's data region: the first
/// `BTT_ALIGNMENT` bytes are reserved for the small blk-specific header.
pub(crate) const BLK_BTT_START: u64 = BTT_ALIGNMENT;

const LOG_CURSORS_SIZE: u64 = 24; // start_offset, end_offset, write_offset

pub(crate) enum Fix {
    CanonicalizeLog { replica: usize, start: u64, end: u64, write: u64 },
    FixBsize { replica: usize, bsize: u32 },
}

pub(crate) fn run(session: &mut Session) -> Result<(), CheckError> {
    let nrepl = session.poolset.nreplicas();
    for r in 0..nrepl {
        match session.pool_type {
            PoolType::Log => check_log(session, r)?,
            PoolType::Blk => check_blk(session, r)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_log(session: &mut Session, replica: usize) -> Result<(), CheckError> {
    let total = session.poolset.replicas[replica].data_size();
    let bytes = session
        .poolset
        .read(replica, 0, LOG_CURSORS_SIZE)
        .map_err(|e| CheckError::Format(e.to_string()))?;
    let start = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let end = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let write = u64::from_le_bytes(bytes[16..24].try_into().unwrap());

    let canon_start = codec::round_up(LOG_CURSORS_SIZE, codec::LOG_FORMAT_DATA_ALIGN);
    let canon_end = total;
    let canon_write = write.clamp(canon_start, canon_end);

    if start != canon_start || end != canon_end || write < canon_start || write > canon_end {
        session.raise(
            format!(
                "replica {replica}: log write cursors are inconsistent with the pool size | reset start/end/write offsets?"
            ),
            PendingFix::LogBlkHdr(Fix::CanonicalizeLog {
                replica,
                start: canon_start,
                end: canon_end,
                write: canon_write,
            }),
        );
    }
    Ok(())
}

fn check_blk(session: &mut Session, replica: usize) -> Result<(), CheckError> {
    let total = session.poolset.replicas[replica].data_size();
    let bytes = session
        .poolset
        .read(replica, 0, 8)
        .map_err(|e| CheckError::Format(e.to_string()))?;
    let bsize = u32::from_le_bytes(bytes[0..4].try_into().unwrap());

    let max_bsize = total.saturating_sub(BLK_BTT_START).min(u32::MAX as u64) as u32;
    let mut canon = bsize.clamp(MIN_LBA_SIZE, max_bsize.max(MIN_LBA_SIZE));

    // Trust an existing BTT arena's recorded external_lbasize over a
    // battered blk-level bsize field, since the arena geometry is what
    // actually constrains every future read/write.
    if let Ok(Some((_, info))) = pooldata::first_valid_btt_info(&mut session.poolset, replica, BLK_BTT_START) {
        if info.external_lbasize >= MIN_LBA_SIZE {
            canon = info.external_lbasize;
        }
    }

    if bsize != canon {
        session.raise(
            format!("replica {replica}: block size {bsize} does not match the pool's BTT layout | set it to {canon}?"),
            PendingFix::LogBlkHdr(Fix::FixBsize { replica, bsize: canon }),
        );
    }
    Ok(())
}

pub(crate) fn apply_fix(session: &mut Session, fix: Fix) -> Result<(), CheckError> {
    match fix {
        Fix::CanonicalizeLog { replica, start, end, write } => {
            let mut buf = Vec::with_capacity(24);
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&end.to_le_bytes());
            buf.extend_from_slice(&write.to_le_bytes());
            session
                .poolset
                .write(replica, 0, &buf)
                .map_err(|e| CheckError::Format(e.to_string()))?;
        }
        Fix::FixBsize { replica, bsize } => {
            let mut buf = Vec::with_capacity(8);
            buf.extend_from_slice(&bsize.to_le_bytes());
            buf.extend_from_slice(&[0u8; 4]);
            session
                .poolset
                .write(replica, 0, &buf)
                .map_err(|e| CheckError::Format(e.to_string()))?;
        }
    }
    Ok(())
}
