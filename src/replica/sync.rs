//! Replica sync (C10): rebuilds one replica's parts from another, within
//! the byte range the caller names, and restitches the neighbour-UUID web
//! around it afterwards. Grounded in the driver's own pool-header repair
//! logic in [`crate::check::pool_hdr`], reused here outside of a check
//! session.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tracing::{info, warn};
use uuid::Uuid;

use crate::codec::{self, PoolHdr};
use crate::error::SyncError;
use crate::poolset::PoolSet;

/// `flags` bitset accepted by [`sync`] (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags(u32);

impl SyncFlags {
    pub const VERIFY: SyncFlags = SyncFlags(1 << 0);
    pub const KEEPORIG: SyncFlags = SyncFlags(1 << 1);
    pub const TRUNCATE: SyncFlags = SyncFlags(1 << 2);

    pub fn contains(self, other: SyncFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SyncFlags {
    type Output = SyncFlags;
    fn bitor(self, rhs: SyncFlags) -> SyncFlags {
        SyncFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub poolset_path: PathBuf,
    pub replto: usize,
    pub replfrom: usize,
    /// Restricts the rebuild to a single target part; the corresponding
    /// source part is assumed to sit at the same index.
    pub partto: Option<usize>,
    /// Restricts the rebuild to a single source part; the corresponding
    /// target part is assumed to sit at the same index.
    pub partfrom: Option<usize>,
    pub flags: SyncFlags,
}

/// Rebuilds `args.replto` from `args.replfrom` in the pool-set described at
/// `args.poolset_path`.
pub fn sync(args: SyncArgs) -> Result<(), SyncError> {
    if args.replto == args.replfrom {
        return Err(SyncError::WrongArg);
    }

    let mut set = PoolSet::parse(&args.poolset_path).map_err(|_| SyncError::WrongArg)?;
    let nrepl = set.nreplicas();
    if args.replto >= nrepl || args.replfrom >= nrepl {
        return Err(SyncError::WrongReplNum);
    }

    let dry_run = args.flags.contains(SyncFlags::VERIFY);
    set.open(dry_run).map_err(|_| SyncError::RepOpenErr)?;
    set.map_headers(dry_run).map_err(|_| SyncError::RepOpenErr)?;

    if !replica_is_healthy(&mut set, args.replfrom) {
        warn!(replica = args.replfrom, "sync source replica is not checksum-healthy");
        set.close();
        return Err(SyncError::RepOpenErr);
    }

    if dry_run {
        info!(replfrom = args.replfrom, replto = args.replto, "would rebuild target replica (dry run)");
        set.close();
        return Ok(());
    }

    rebuild_replica(&mut set, &args)?;

    set.close();
    Ok(())
}

fn replica_is_healthy(set: &mut PoolSet, replica: usize) -> bool {
    let nparts = set.replicas[replica].parts.len();
    for p in 0..nparts {
        let bytes = set.replicas[replica].parts[p].hdr_bytes().to_vec();
        let hdr: PoolHdr = match codec::decode(&bytes) {
            Ok(h) => h,
            Err(_) => return false,
        };
        if !codec::pool_hdr_checksum_valid(&hdr) {
            return false;
        }
    }
    true
}

/// Resolves the `[first, last]` inclusive part-index range to rebuild,
/// from `partto`/`partfrom` if given, else the whole replica (spec §4.10
/// step 2).
fn part_range(args: &SyncArgs, nparts: usize) -> (usize, usize) {
    if let Some(partto) = args.partto {
        (partto, partto)
    } else if let Some(partfrom) = args.partfrom {
        (partfrom, partfrom)
    } else {
        (0, nparts.saturating_sub(1))
    }
}

fn offset_of_part(set: &PoolSet, replica: usize, part: usize) -> u64 {
    set.replicas[replica].parts[..part].iter().map(|p| p.data_len()).sum()
}

fn rebuild_replica(set: &mut PoolSet, args: &SyncArgs) -> Result<(), SyncError> {
    let src = args.replfrom;
    let dst = args.replto;
    if set.replicas[src].parts.len() != set.replicas[dst].parts.len() {
        warn!(src, dst, "part-count mismatch between source and target replica");
        return Err(SyncError::InsufTargetMem);
    }

    let nparts = set.replicas[src].parts.len();
    let (first, last) = part_range(args, nparts);

    for p in first..=last {
        let src_len = set.replicas[src].parts[p].data_len();
        let dst_len = set.replicas[dst].parts[p].data_len();
        if src_len > dst_len && !args.flags.contains(SyncFlags::TRUNCATE) {
            return Err(SyncError::InsufTargetMem);
        }
    }

    let src_poolset_uuid = {
        let bytes = set.replicas[src].parts[0].hdr_bytes().to_vec();
        let hdr: PoolHdr = codec::decode(&bytes).map_err(|_| SyncError::InternalErr)?;
        hdr.poolset_uuid
    };

    // Unless dry-run (already handled by the caller), unlink every target
    // part file in range and recreate it at its recorded filesize, then
    // reopen and remap its header so later reads/writes see the fresh file.
    for p in first..=last {
        let path = set.replicas[dst].parts[p].path.clone();
        let filesize = set.replicas[dst].parts[p].filesize;
        set.replicas[dst].parts[p].hdr_map = None;
        set.replicas[dst].parts[p].file = None;
        if path.exists() {
            std::fs::remove_file(&path).map_err(|_| SyncError::PartFileDelErr)?;
        }
        let f = std::fs::File::create(&path).map_err(|_| SyncError::PartFileCreateErr)?;
        f.set_len(filesize).map_err(|_| SyncError::PartFileCreateErr)?;
        let mut perms = f.metadata().map_err(|_| SyncError::PartFileCreateErr)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(&path, perms).map_err(|_| SyncError::PartFileCreateErr)?;
        drop(f);

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|_| SyncError::RepOpenErr)?;
        set.replicas[dst].parts[p].file = Some(file);
    }
    set.map_headers(false).map_err(|_| SyncError::RepOpenErr)?;

    let mut part_uuids = Vec::with_capacity(nparts);
    for p in 0..nparts {
        if (first..=last).contains(&p) {
            let src_bytes = set.replicas[src].parts[p].hdr_bytes().to_vec();
            let mut hdr: PoolHdr = codec::decode(&src_bytes).map_err(|_| SyncError::InternalErr)?;
            hdr.uuid = *Uuid::new_v4().as_bytes();
            hdr.poolset_uuid = src_poolset_uuid;
            part_uuids.push(hdr.uuid);
            codec::pool_hdr_set_checksum(&mut hdr);
            let out = codec::encode(&hdr);
            set.replicas[dst].parts[p].hdr_bytes_mut().copy_from_slice(&out);
            set.msync_header(dst, p).map_err(|_| SyncError::PartFileCreateErr)?;
            set.replicas[dst].parts[p].uuid = Uuid::from_bytes(hdr.uuid);

            let take = set.replicas[src].parts[p].data_len().min(set.replicas[dst].parts[p].data_len());
            let data = set
                .read(src, offset_of_part(set, src, p), take)
                .map_err(|_| SyncError::RepOpenErr)?;
            set.write(dst, offset_of_part(set, dst, p), &data).map_err(|_| SyncError::PartFileCreateErr)?;
        } else {
            let bytes = set.replicas[dst].parts[p].hdr_bytes().to_vec();
            let hdr: PoolHdr = codec::decode(&bytes).map_err(|_| SyncError::InternalErr)?;
            part_uuids.push(hdr.uuid);
        }
    }

    restitch_part_web(set, dst, &part_uuids).map_err(|_| SyncError::CannotUuidsUpdate)?;
    restitch_neighbour_replicas(set, dst, part_uuids[0]).map_err(|_| SyncError::CannotUuidsUpdate)?;
    Ok(())
}

fn restitch_part_web(set: &mut PoolSet, replica: usize, part_uuids: &[[u8; 16]]) -> anyhow::Result<()> {
    let nparts = part_uuids.len();
    for p in 0..nparts {
        let bytes = set.replicas[replica].parts[p].hdr_bytes().to_vec();
        let mut hdr: PoolHdr = codec::decode(&bytes)?;
        if nparts > 1 {
            hdr.next_part_uuid = part_uuids[(p + 1) % nparts];
            hdr.prev_part_uuid = part_uuids[(p + nparts - 1) % nparts];
        }
        codec::pool_hdr_set_checksum(&mut hdr);
        let out = codec::encode(&hdr);
        set.replicas[replica].parts[p].hdr_bytes_mut().copy_from_slice(&out);
        set.msync_header(replica, p)?;
        set.replicas[replica].parts[p].uuid = Uuid::from_bytes(hdr.uuid);
    }
    Ok(())
}

/// Points the replicas neighbouring `dst` at its (possibly new) first part
/// uuid (spec §4.10 step 9).
fn restitch_neighbour_replicas(set: &mut PoolSet, dst: usize, dst_first_uuid: [u8; 16]) -> anyhow::Result<()> {
    let nrepl = set.nreplicas();
    if nrepl < 2 {
        return Ok(());
    }
    let next_r = (dst + 1) % nrepl;
    let prev_r = (dst + nrepl - 1) % nrepl;

    let bytes = set.replicas[prev_r].parts[0].hdr_bytes().to_vec();
    let mut hdr: PoolHdr = codec::decode(&bytes)?;
    hdr.next_repl_uuid = dst_first_uuid;
    codec::pool_hdr_set_checksum(&mut hdr);
    let out = codec::encode(&hdr);
    set.replicas[prev_r].parts[0].hdr_bytes_mut().copy_from_slice(&out);
    set.msync_header(prev_r, 0)?;

    if next_r != prev_r {
        let bytes = set.replicas[next_r].parts[0].hdr_bytes().to_vec();
        let mut hdr: PoolHdr = codec::decode(&bytes)?;
        hdr.prev_repl_uuid = dst_first_uuid;
        codec::pool_hdr_set_checksum(&mut hdr);
        let out = codec::encode(&hdr);
        set.replicas[next_r].parts[0].hdr_bytes_mut().copy_from_slice(&out);
        set.msync_header(next_r, 0)?;
    }
    Ok(())
}
