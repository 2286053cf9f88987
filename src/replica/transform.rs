//! Replica transform (C11): reshapes a pool-set's part/replica layout to
//! match a new descriptor while preserving the pool's data. Parts are
//! staged under a `_temp` suffix, filled from the source pool-set, then
//! renamed into place — the same stage/copy/rename shape PMDK's
//! `transform.c` uses to keep a crash from leaving a half-written replica
//! visible under its final name.

use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::codec::{self, PoolHdr};
use crate::error::{ArgError, TransformError};
use crate::poolset::PoolSet;

/// `flags` bitset accepted by [`transform`] (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransformFlags(u32);

impl TransformFlags {
    pub const VERIFY: TransformFlags = TransformFlags(1 << 0);
    pub const KEEPORIG: TransformFlags = TransformFlags(1 << 1);

    pub fn contains(self, other: TransformFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TransformFlags {
    type Output = TransformFlags;
    fn bitor(self, rhs: TransformFlags) -> TransformFlags {
        TransformFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct TransformArgs {
    pub src_poolset: PathBuf,
    pub dst_poolset: PathBuf,
    pub flags: TransformFlags,
}

/// A span where source and destination part lists disagree on
/// boundaries or paths; `[part_first_in, part_last_in]` of the source
/// maps onto `[part_first_out, part_last_out]` of the destination (spec
/// §4.11 step 1).
struct Region {
    part_first_in: usize,
    part_last_in: usize,
    part_first_out: usize,
    part_last_out: usize,
}

/// Transforms the pool-set at `args.src_poolset` so its on-disk layout
/// matches `args.dst_poolset`, copying data across and leaving the
/// source's part files untouched until every new part has been staged.
pub fn transform(args: TransformArgs) -> Result<(), TransformError> {
    if args.flags.contains(TransformFlags::VERIFY) && args.flags.contains(TransformFlags::KEEPORIG) {
        return Err(ArgError::DryRunWithKeepOrig.into());
    }
    let dry_run = args.flags.contains(TransformFlags::VERIFY);
    let keep_orig = args.flags.contains(TransformFlags::KEEPORIG);

    let src_desc = PoolSet::parse(&args.src_poolset).map_err(|e| TransformError::Format(e.to_string()))?;
    let dst_desc = PoolSet::parse(&args.dst_poolset).map_err(|e| TransformError::Format(e.to_string()))?;
    plan(&src_desc, &dst_desc)?;

    let nrepl = src_desc.nreplicas();
    let regions: Vec<Vec<Region>> = (0..nrepl)
        .map(|r| discover_regions(&src_desc.replicas[r].parts, &dst_desc.replicas[r].parts))
        .collect();

    if dry_run {
        info!("dry run: layout change validated, no files touched");
        return Ok(());
    }

    let mut src = src_desc;
    src.open(true).map_err(|e| TransformError::Format(e.to_string()))?;

    let mut staged_paths: Vec<Vec<(PathBuf, PathBuf)>> = Vec::with_capacity(nrepl);
    for r in 0..nrepl {
        let mut pairs = Vec::new();
        for part in &dst_desc.replicas[r].parts {
            let temp = temp_path(&part.path);
            std::fs::File::create(&temp)
                .and_then(|f| f.set_len(part.filesize))
                .map_err(|e| TransformError::Io { path: temp.display().to_string(), source: e })?;
            pairs.push((temp, part.path.clone()));
        }
        staged_paths.push(pairs);
    }

    for r in 0..nrepl {
        // Destination part index -> the source part index whose header is
        // copied one-for-one, for every region boundary. Interior parts of
        // a region (absent here) get a freshly synthesized header.
        let mut header_donor: Vec<Option<usize>> = vec![None; dst_desc.replicas[r].parts.len()];
        for region in &regions[r] {
            header_donor[region.part_first_out] = Some(region.part_first_in);
            header_donor[region.part_last_out] = Some(region.part_last_in);
        }

        let mut offset = 0u64;
        let data_size = src.replicas[r].data_size();
        for (p, (temp_path, _final_path)) in staged_paths[r].iter().enumerate() {
            let filesize = std::fs::metadata(temp_path)
                .map_err(|e| TransformError::Io { path: temp_path.display().to_string(), source: e })?
                .len();
            let data_len = filesize.saturating_sub(codec::POOL_HDR_SIZE as u64);
            let take = data_len.min(data_size.saturating_sub(offset));

            let bytes = src.read(r, offset, take).map_err(|e| TransformError::Format(e.to_string()))?;
            match header_donor[p] {
                Some(donor) => {
                    let donor_path = &src.replicas[r].parts[donor].path;
                    write_staged_part_with_header(temp_path, &read_part_header(donor_path)?, &bytes)?;
                }
                None => write_staged_part_fresh(temp_path, &bytes)?,
            }
            offset += take;
        }
        restitch_staged_replica(&staged_paths[r])?;
    }

    src.close();

    // Dispose of the original input parts before renaming the staged ones
    // into place, since a destination path may reuse a source path.
    for repl in &src.replicas {
        for part in &repl.parts {
            if keep_orig {
                std::fs::rename(&part.path, old_path(&part.path))
                    .map_err(|e| TransformError::Io { path: part.path.display().to_string(), source: e })?;
            } else {
                std::fs::remove_file(&part.path)
                    .map_err(|e| TransformError::Io { path: part.path.display().to_string(), source: e })?;
            }
        }
    }

    for pairs in &staged_paths {
        for (temp, dest) in pairs {
            std::fs::rename(temp, dest)
                .map_err(|e| TransformError::Io { path: dest.display().to_string(), source: e })?;
            let mut perms = std::fs::metadata(dest)
                .map_err(|e| TransformError::Io { path: dest.display().to_string(), source: e })?
                .permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(dest, perms)
                .map_err(|e| TransformError::Io { path: dest.display().to_string(), source: e })?;
        }
    }

    Ok(())
}

fn plan(src: &PoolSet, dst: &PoolSet) -> Result<(), TransformError> {
    if src.nreplicas() != dst.nreplicas() {
        return Err(ArgError::ReplicaCountMismatch.into());
    }
    Ok(())
}

/// Splits `src_parts`/`dst_parts` into equal-prefix spans (skipped) and
/// disagreement regions (spec §4.11 step 1): parts consumed at matching
/// cumulative offsets with identical path and size agree; the first
/// mismatch opens a region that stays open until the two sides' cumulative
/// offsets realign.
fn discover_regions(src_parts: &[crate::poolset::Part], dst_parts: &[crate::poolset::Part]) -> Vec<Region> {
    let mut regions = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let (mut acc_src, mut acc_dst) = (0u64, 0u64);
    let (nsrc, ndst) = (src_parts.len(), dst_parts.len());

    while i < nsrc && j < ndst {
        if acc_src == acc_dst
            && src_parts[i].path == dst_parts[j].path
            && src_parts[i].filesize == dst_parts[j].filesize
        {
            acc_src += src_parts[i].data_len();
            acc_dst += dst_parts[j].data_len();
            i += 1;
            j += 1;
            continue;
        }

        let first_in = i;
        let first_out = j;
        let mut end_src = acc_src + src_parts[i].data_len();
        let mut end_dst = acc_dst + dst_parts[j].data_len();
        i += 1;
        j += 1;
        while end_src != end_dst {
            if end_src < end_dst {
                if i >= nsrc {
                    break;
                }
                end_src += src_parts[i].data_len();
                i += 1;
            } else {
                if j >= ndst {
                    break;
                }
                end_dst += dst_parts[j].data_len();
                j += 1;
            }
        }

        regions.push(Region {
            part_first_in: first_in,
            part_last_in: i - 1,
            part_first_out: first_out,
            part_last_out: j - 1,
        });
        acc_src = end_src;
        acc_dst = end_dst;
    }
    regions
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("_temp");
    path.with_file_name(name)
}

fn old_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("_old");
    path.with_file_name(name)
}

fn read_part_header(path: &Path) -> Result<Vec<u8>, TransformError> {
    let mut f =
        std::fs::File::open(path).map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    let mut buf = vec![0u8; codec::POOL_HDR_SIZE];
    f.read_exact(&mut buf).map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    Ok(buf)
}

/// Writes a region-boundary part: the donor's header copied byte-for-byte
/// (its own identity stays put; `restitch_staged_replica` fixes up the
/// neighbour links afterwards) followed by the copied data.
fn write_staged_part_with_header(path: &Path, header: &[u8], data: &[u8]) -> Result<(), TransformError> {
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    f.write_all(header).map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    f.seek(SeekFrom::Start(codec::POOL_HDR_SIZE as u64))
        .map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    f.write_all(data).map_err(|e| TransformError::Io { path: path.display().to_string(), source: e })?;
    Ok(())
}

/// Writes an interior part with no counterpart on the source side: a
/// fresh default header with a new uuid.
fn write_staged_part_fresh(path: &Path, data: &[u8]) -> Result<(), TransformError> {
    let mut hdr = PoolHdr::default();
    hdr.uuid = *Uuid::new_v4().as_bytes();
    codec::pool_hdr_set_checksum(&mut hdr);
    let hdr_bytes = codec::encode(&hdr);
    write_staged_part_with_header(path, &hdr_bytes, data)
}

/// Restitches the staged parts' neighbour-UUID fields now that every part
/// in the replica has a header on disk.
fn restitch_staged_replica(pairs: &[(PathBuf, PathBuf)]) -> Result<(), TransformError> {
    let nparts = pairs.len();
    let mut uuids = Vec::with_capacity(nparts);
    for (temp, _) in pairs {
        let bytes = read_part_header(temp)?;
        let hdr: PoolHdr = codec::decode(&bytes).map_err(|e| TransformError::Format(e.to_string()))?;
        uuids.push(hdr.uuid);
    }

    for (i, (temp, _)) in pairs.iter().enumerate() {
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp)
            .map_err(|e| TransformError::Io { path: temp.display().to_string(), source: e })?;
        let mut buf = vec![0u8; codec::POOL_HDR_SIZE];
        f.read_exact(&mut buf).map_err(|e| TransformError::Io { path: temp.display().to_string(), source: e })?;
        let mut hdr: PoolHdr = codec::decode(&buf).map_err(|e| TransformError::Format(e.to_string()))?;
        if nparts > 1 {
            hdr.next_part_uuid = uuids[(i + 1) % nparts];
            hdr.prev_part_uuid = uuids[(i + nparts - 1) % nparts];
        }
        codec::pool_hdr_set_checksum(&mut hdr);
        let out = codec::encode(&hdr);
        f.seek(SeekFrom::Start(0)).map_err(|e| TransformError::Io { path: temp.display().to_string(), source: e })?;
        f.write_all(&out).map_err(|e| TransformError::Io { path: temp.display().to_string(), source: e })?;
    }
    Ok(())
}
