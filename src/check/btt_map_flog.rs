//! BTT map/flog check (C8): loads each arena's map and free-list log,
//! finds map entries and flog pairs that don't agree with each other, and
//! — only when the numbers make a bijective repair possible — reassigns
//! the orphaned internal blocks to the broken entries (spec §4.3's
//! "unmapped count must equal invalid map plus invalid flog" condition).
//!
//! Ported from `check_btt_map_flog.c`'s `map_entry_check`/`flog_entry_check`:
//! the map is `external_nlba` entries wide (not `internal_nlba` — that
//! would overrun into flog territory), and a flog pair's current half is
//! cross-checked against both the map's and the flog's own used-block
//! bitmaps before it's trusted.

use crate::bitmap::Bitmap;
use crate::codec::{
    self, BttFlog, BttInfo, BTT_DEV_MAP_ENTRY_INVALID, BTT_MAP_ENTRY_ERROR, BTT_MAP_ENTRY_LBA_MASK,
};
use crate::error::CheckError;

use super::btt_info::scan_arenas;
use super::{PendingFix, PoolType, Session};

pub(crate) enum Fix {
    ReassignArena {
        replica: usize,
        arena_offset: u64,
        /// (offset from arena start, new little-endian map entry)
        map_patches: Vec<(u64, u32)>,
        /// (offset from arena start, new first-of-pair flog record)
        flog_patches: Vec<(u64, BttFlog)>,
    },
}

pub(crate) fn run(session: &mut Session) -> Result<(), CheckError> {
    let nrepl = session.poolset.nreplicas();
    for r in 0..nrepl {
        let arenas = scan_arenas(session, r);
        for (offset, info) in arenas {
            check_arena(session, r, offset, &info)?;
        }
    }
    Ok(())
}

fn flog_entry_size() -> u64 {
    codec::round_up(2 * std::mem::size_of::<BttFlog>() as u64, codec::BTT_FLOG_PAIR_ALIGN)
}

/// The sequence cycle used to tell which half of a flog pair is current:
/// 0 (unset) -> 2 -> 3 -> 1 -> 2 -> ... A pair is only trustworthy when
/// exactly one side's sequence is the successor of the other's.
fn seq_next(seq: u32) -> u32 {
    match seq {
        0 => 2,
        2 => 3,
        3 => 1,
        1 => 2,
        _ => 0,
    }
}

/// Picks the current half of a flog pair, if the pair is internally
/// consistent. `Some(0)` means `a` (alpha) is current, `Some(1)` means `b`
/// (beta) is current.
fn flog_get_valid(a: &BttFlog, b: &BttFlog) -> Option<usize> {
    match (a.seq, b.seq) {
        (0, 0) => None,
        (s, 0) if s != 0 => Some(0),
        (0, s) if s != 0 => Some(1),
        (sa, sb) if seq_next(sa) == sb => Some(1),
        (sa, sb) if seq_next(sb) == sa => Some(0),
        _ => None,
    }
}

fn check_arena(session: &mut Session, replica: usize, offset: u64, info: &BttInfo) -> Result<(), CheckError> {
    let internal_nlba = info.internal_nlba as usize;
    let external_nlba = info.external_nlba as usize;
    let nfree = info.nfree as usize;
    let is_btt_dev = matches!(session.pool_type, PoolType::BttDev);

    let mapsize = codec::round_up(external_nlba as u64 * codec::BTT_MAP_ENTRY_SIZE, codec::BTT_ALIGNMENT);
    let map_bytes = session
        .poolset
        .read(replica, offset + info.mapoff, mapsize)
        .map_err(|e| CheckError::Format(e.to_string()))?;
    let map = codec::btt_map_to_host(&map_bytes[..external_nlba * 4]);

    let pair_size = flog_entry_size();
    let flog_bytes = session
        .poolset
        .read(replica, offset + info.flogoff, nfree as u64 * pair_size)
        .map_err(|e| CheckError::Format(e.to_string()))?;

    let mut bitmap = Bitmap::new(internal_nlba);
    let mut fbitmap = Bitmap::new(internal_nlba);
    let mut invalid_map_idx = Vec::new();
    let mut invalid_flog_idx = Vec::new();

    // Map entries: a slot carrying no flags has never been remapped and is
    // implicitly identity-mapped to its own external index.
    for (i, &raw) in map.iter().enumerate() {
        let flags = raw & !BTT_MAP_ENTRY_LBA_MASK;
        let mut entry = (raw & BTT_MAP_ENTRY_LBA_MASK) as usize;
        let flags_valid = if is_btt_dev { raw != BTT_DEV_MAP_ENTRY_INVALID } else { true };
        if flags == 0 {
            entry = i;
        }
        if entry < internal_nlba && flags_valid {
            if bitmap.check_bit(entry) {
                invalid_map_idx.push(i);
            } else {
                bitmap.set_bit(entry);
            }
        } else {
            invalid_map_idx.push(i);
        }
    }

    // Flog entries.
    let rec_size = std::mem::size_of::<BttFlog>();
    for i in 0..nfree {
        let pair_off = i * pair_size as usize;
        let a: BttFlog = codec::decode(&flog_bytes[pair_off..pair_off + rec_size])
            .map_err(|e| CheckError::Format(e.to_string()))?;
        let b: BttFlog = codec::decode(&flog_bytes[pair_off + rec_size..pair_off + 2 * rec_size])
            .map_err(|e| CheckError::Format(e.to_string()))?;

        let which = match flog_get_valid(&a, &b) {
            Some(w) => w,
            None => {
                invalid_flog_idx.push(i);
                continue;
            }
        };
        let cur = if which == 0 { a } else { b };
        let sibling = if which == 0 { b } else { a };

        let entry = (cur.old_map & BTT_MAP_ENTRY_LBA_MASK) as usize;
        let new_entry = (cur.new_map & BTT_MAP_ENTRY_LBA_MASK) as usize;

        if cur.lba as usize >= external_nlba || entry >= internal_nlba || new_entry >= internal_nlba {
            invalid_flog_idx.push(i);
            continue;
        }

        if fbitmap.check_bit(entry) {
            invalid_flog_idx.push(i);
        } else if bitmap.check_bit(entry) {
            // old_map already claimed by the map: an in-flight write,
            // unless new_map is claimed too.
            if bitmap.check_bit(new_entry) {
                invalid_flog_idx.push(i);
            } else {
                bitmap.set_bit(new_entry);
                fbitmap.set_bit(entry);
            }
        } else {
            let valid = if entry == new_entry {
                which == 0
                    && cur.lba as usize == i
                    && cur.seq == 1
                    && entry == external_nlba + i
                    && sibling.is_zeroed()
            } else {
                (map[cur.lba as usize] & BTT_MAP_ENTRY_LBA_MASK) as usize == new_entry
            };
            if valid {
                bitmap.set_bit(entry);
                fbitmap.set_bit(entry);
            } else {
                invalid_flog_idx.push(i);
            }
        }
    }

    let mut unmapped = Vec::new();
    for lba in 0..internal_nlba {
        if !bitmap.check_bit(lba) {
            unmapped.push(lba as u32);
        }
    }

    if invalid_map_idx.is_empty() && invalid_flog_idx.is_empty() && unmapped.is_empty() {
        return Ok(());
    }

    if !session.args.repair {
        let status = session.not_consistent(format!(
            "replica {replica} arena at offset {offset}: {} invalid map entries, {} invalid flog pairs, {} unmapped internal blocks",
            invalid_map_idx.len(), invalid_flog_idx.len(), unmapped.len()
        ));
        session.outbox.push_back(status);
        return Ok(());
    }

    if unmapped.len() != invalid_map_idx.len() + invalid_flog_idx.len() {
        session.outbox.push_back(session.fail(
            super::CheckResult::CannotRepair,
            format!(
                "replica {replica} arena at offset {offset}: {} unmapped internal blocks cannot be bijectively assigned to {} invalid map entries and {} invalid flog pairs",
                unmapped.len(), invalid_map_idx.len(), invalid_flog_idx.len()
            ),
        ));
        return Ok(());
    }

    let mut donor_blocks = unmapped.into_iter();
    let mut map_patches = Vec::new();
    for &i in &invalid_map_idx {
        if let Some(block) = donor_blocks.next() {
            let rel_off = info.mapoff + i as u64 * codec::BTT_MAP_ENTRY_SIZE;
            map_patches.push((rel_off, block | BTT_MAP_ENTRY_ERROR));
        }
    }

    let mut flog_patches = Vec::new();
    for &i in &invalid_flog_idx {
        if let Some(block) = donor_blocks.next() {
            let rel_off = info.flogoff + i as u64 * pair_size;
            let entry = block | BTT_MAP_ENTRY_ERROR;
            let repaired = BttFlog { lba: i as u32, old_map: entry, new_map: entry, seq: 1, reserved: [0; 16] };
            flog_patches.push((rel_off, repaired));
        }
    }

    session.ask(
        format!(
            "replica {replica} arena at offset {offset}: {} map entries and {} flog pairs are broken, but enough orphaned blocks exist to repair them | reassign them now?",
            invalid_map_idx.len(), invalid_flog_idx.len()
        ),
        PendingFix::BttMapFlog(Fix::ReassignArena {
            replica,
            arena_offset: offset,
            map_patches,
            flog_patches,
        }),
    );

    Ok(())
}

pub(crate) fn apply_fix(session: &mut Session, fix: Fix) -> Result<(), CheckError> {
    match fix {
        Fix::ReassignArena { replica, arena_offset, map_patches, flog_patches } => {
            for (rel_off, value) in map_patches {
                session
                    .poolset
                    .write(replica, arena_offset + rel_off, &value.to_le_bytes())
                    .map_err(|e| CheckError::Format(e.to_string()))?;
            }
            for (rel_off, flog) in flog_patches {
                let mut buf = codec::encode(&flog);
                buf.extend(codec::encode(&BttFlog::default()));
                session
                    .poolset
                    .write(replica, arena_offset + rel_off, &buf)
                    .map_err(|e| CheckError::Format(e.to_string()))?;
            }
        }
    }
    Ok(())
}
