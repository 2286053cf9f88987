//! BTT arena-info check (C7): walks the arena chain, validates each
//! info header's checksum, and recovers a damaged one from its trailing
//! backup copy or, failing that, from a donor arena's geometry via
//! `btt_info_set` (spec §4.3).

use uuid::Uuid;

use super::log_blk_hdr::BLK_BTT_START;
use super::{Arena, PendingFix, Session};
use crate::codec::{self, BttInfo, PoolType, BTT_INFO_SIZE};
use crate::error::CheckError;
use crate::pooldata;

pub(crate) enum Fix {
    RestoreFromBackup { replica: usize, offset: u64, backup: BttInfo },
    RegenerateFromDonor { replica: usize, offset: u64, info: BttInfo },
}

fn start_offset(session: &Session) -> u64 {
    match session.pool_type {
        PoolType::Blk => BLK_BTT_START,
        _ => 0,
    }
}

/// Walks every arena in `replica`, returning `(offset, info)` for each one
/// whose checksum currently validates. Used both by this step's own check
/// and, after repair, by the map/flog step to find the confirmed-good
/// arenas to operate on.
pub(crate) fn scan_arenas(session: &mut Session, replica: usize) -> Vec<(u64, BttInfo)> {
    let total = session.poolset.replicas[replica].data_size();
    let mut out = Vec::new();
    let mut offset = start_offset(session);
    while offset + BTT_INFO_SIZE as u64 <= total {
        match pooldata::read_btt_info(&mut session.poolset, replica, offset) {
            Ok(info) if codec::btt_info_checksum_valid(&info) => {
                let next = if info.nextoff != 0 { offset + info.nextoff } else { 0 };
                out.push((offset, info));
                if next == 0 || next <= offset {
                    break;
                }
                offset = next;
            }
            _ => break,
        }
    }
    out
}

pub(crate) fn run(session: &mut Session) -> Result<(), CheckError> {
    let nrepl = session.poolset.nreplicas();
    for r in 0..nrepl {
        check_replica(session, r)?;
    }
    Ok(())
}

fn check_replica(session: &mut Session, replica: usize) -> Result<(), CheckError> {
    let total = session.poolset.replicas[replica].data_size();
    let start = start_offset(session);

    // Establish a donor geometry (first structurally valid arena anywhere
    // in the pool) up front, for use if regeneration turns out necessary.
    let donor = pooldata::first_valid_btt_info(&mut session.poolset, replica, start)
        .ok()
        .flatten()
        .map(|(_, info)| info);

    let mut offset = start;
    let mut arena_id = 0u32;
    while offset + BTT_INFO_SIZE as u64 <= total {
        let arena_size = pooldata::next_arena_offset(&mut session.poolset, replica, offset)
            .checked_sub(offset)
            .filter(|&s| s > 0)
            .unwrap_or(total - offset);
        let space_left = total.saturating_sub(offset + arena_size);

        match pooldata::read_btt_info(&mut session.poolset, replica, offset) {
            Ok(info) if codec::btt_info_checksum_valid(&info) => {
                offset = if info.nextoff != 0 { offset + info.nextoff } else { offset + arena_size };
                arena_id += 1;
                continue;
            }
            _ => {
                if !session.args.repair {
                    let status = session.not_consistent(format!(
                        "replica {replica} arena {arena_id}: BTT info checksum does not match its contents"
                    ));
                    session.outbox.push_back(status);
                    return Ok(());
                }

                // Trailing backup copy lives at the end of this arena.
                let backup_off = offset + arena_size - BTT_INFO_SIZE as u64;
                if backup_off > offset {
                    if let Ok(backup) = pooldata::read_btt_info(&mut session.poolset, replica, backup_off) {
                        if codec::btt_info_checksum_valid(&backup) {
                            session.ask(
                                format!(
                                    "replica {replica} arena {arena_id}: primary BTT info is damaged | restore it from its backup copy?"
                                ),
                                PendingFix::BttInfo(Fix::RestoreFromBackup { replica, offset, backup }),
                            );
                            offset += arena_size;
                            arena_id += 1;
                            continue;
                        }
                    }
                }

                if let Some(donor) = &donor {
                    let mut regen = BttInfo { sig: *codec::SIG_BTT_INFO, ..BttInfo::default() };
                    regen.uuid = *Uuid::new_v4().as_bytes();
                    regen.parent_uuid = donor.parent_uuid;
                    regen.major = donor.major;
                    regen.minor = donor.minor;
                    if codec::btt_info_set(&mut regen, donor.external_lbasize, donor.nfree, arena_size, space_left)
                        .is_ok()
                    {
                        session.ask(
                            format!(
                                "replica {replica} arena {arena_id}: BTT info has no usable backup | regenerate it from the pool's other arenas?"
                            ),
                            PendingFix::BttInfo(Fix::RegenerateFromDonor { replica, offset, info: regen }),
                        );
                        offset += arena_size;
                        arena_id += 1;
                        continue;
                    }
                }

                session.outbox.push_back(session.fail(
                    super::CheckResult::CannotRepair,
                    format!("replica {replica} arena {arena_id}: BTT info unrecoverable, no donor geometry available"),
                ));
                return Ok(());
            }
        }
    }
    Ok(())
}

pub(crate) fn apply_fix(session: &mut Session, fix: Fix) -> Result<(), CheckError> {
    match fix {
        Fix::RestoreFromBackup { replica, offset, backup } => {
            let mut info = backup;
            codec::btt_info_set_checksum(&mut info);
            let bytes = codec::encode(&info);
            session
                .poolset
                .write(replica, offset, &bytes)
                .map_err(|e| CheckError::Format(e.to_string()))?;
        }
        Fix::RegenerateFromDonor { replica, offset, info } => {
            let mut info = info;
            codec::btt_info_set_checksum(&mut info);
            let bytes = codec::encode(&info);
            session
                .poolset
                .write(replica, offset, &bytes)
                .map_err(|e| CheckError::Format(e.to_string()))?;
        }
    }
    Ok(())
}
