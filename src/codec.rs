#![allow(dead_code)]
//! On-disk binary formats: pool/log/blk headers, BTT info, BTT flog and
//! map entries, and the Fletcher-style checksum shared by all of them.
//!
//! Structs mirror the on-disk layout field-for-field (see spec §3) and are
//! (de)serialized with `bincode`'s fixed-width little-endian encoding, the
//! same way `fsfill`'s `e2fs::SuperBlock` is read with
//! `DefaultOptions::new().with_fixint_encoding()`. Because that codec
//! always produces/consumes little-endian bytes, the struct fields live in
//! host-native integer types between a successful read and the next
//! write-back; `to_host`/`to_le` are the explicit seams the rest of the
//! engine calls at those boundaries (design note, spec §9), even though
//! for struct fields the conversion work is done by `bincode` itself. Flat
//! arrays of BTT map/flog entries are not single structs, so the swap
//! there is a real byte-order conversion, done field-by-field.

use bincode::{DefaultOptions, Options};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::array::Array;

pub const POOL_HDR_SIZE: usize = 4096;
pub const POOL_HDR_UUID_LEN: usize = 16;
pub const POOL_HDR_SIG_LEN: usize = 8;
pub const BTT_INFO_SIG_LEN: usize = 16;

pub const SIG_LOG: &[u8; 8] = b"PMEMLOG\0";
pub const SIG_BLK: &[u8; 8] = b"PMEMBLK\0";
pub const SIG_OBJ: &[u8; 8] = b"PMEMOBJ\0";
pub const SIG_BTT_INFO: &[u8; 16] = b"BTT_ARENA_INFO\0\0";

pub const LOG_FORMAT_MAJOR: u32 = 1;
pub const BLK_FORMAT_MAJOR: u32 = 1;
pub const LOG_FORMAT_DATA_ALIGN: u64 = 4096;

pub const BTT_ALIGNMENT: u64 = 4096;
pub const BTT_MAX_ARENA: u64 = 1 << 34; // 16 GiB, matches BTT's original arena cap
pub const BTT_FLOG_PAIR_ALIGN: u64 = 64;
pub const BTT_MAP_ENTRY_SIZE: u64 = 4;
pub const MIN_LBA_SIZE: u32 = 512;

pub const BTT_MAP_ENTRY_LBA_MASK: u32 = 0x3FFF_FFFF;
pub const BTT_MAP_ENTRY_ZERO: u32 = 1 << 31;
pub const BTT_MAP_ENTRY_ERROR: u32 = 1 << 30;
pub const BTT_DEV_MAP_ENTRY_INVALID: u32 = BTT_MAP_ENTRY_ZERO | BTT_MAP_ENTRY_ERROR;

/// Closed enumeration of pool types (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolType {
    Log,
    Blk,
    Obj,
    BttDev,
    Unknown,
}

impl PoolType {
    pub fn from_signature(sig: &[u8; 8]) -> PoolType {
        if sig == SIG_LOG {
            PoolType::Log
        } else if sig == SIG_BLK {
            PoolType::Blk
        } else if sig == SIG_OBJ {
            PoolType::Obj
        } else {
            PoolType::Unknown
        }
    }

    pub fn signature(self) -> [u8; 8] {
        match self {
            PoolType::Log => *SIG_LOG,
            PoolType::Blk | PoolType::BttDev => *SIG_BLK,
            PoolType::Obj => *SIG_OBJ,
            PoolType::Unknown => [0; 8],
        }
    }
}

bitflags_lite::bitflags! {
    /// Bitset of pool types, so a check step can declare "runs for LOG|BLK".
    pub struct TypeFlags: u32 {
        const LOG     = 0x01;
        const BLK     = 0x02;
        const OBJ     = 0x04;
        const BTT_DEV = 0x08;
        const ALL     = 0x0f;
    }
}

impl TypeFlags {
    pub fn contains_type(self, t: PoolType) -> bool {
        match t {
            PoolType::Log => self.contains(TypeFlags::LOG),
            PoolType::Blk => self.contains(TypeFlags::BLK),
            PoolType::Obj => self.contains(TypeFlags::OBJ),
            PoolType::BttDev => self.contains(TypeFlags::BTT_DEV),
            PoolType::Unknown => false,
        }
    }
}

/// A minimal in-crate stand-in for the `bitflags` crate's macro, since we
/// only need a handful of named bits and don't want an extra dependency
/// the rest of the pack doesn't reach for either.
mod bitflags_lite {
    macro_rules! bitflags {
        (
            $(#[$outer:meta])*
            pub struct $name:ident: $ty:ty {
                $(const $field:ident = $value:expr;)*
            }
        ) => {
            $(#[$outer])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
            pub struct $name($ty);

            impl $name {
                $(pub const $field: $name = $name($value);)*

                pub const fn contains(self, other: $name) -> bool {
                    (self.0 & other.0) == other.0
                }

                pub const fn bits(self) -> $ty {
                    self.0
                }

                pub const fn from_bits_truncate(bits: $ty) -> $name {
                    $name(bits)
                }
            }

            impl std::ops::BitOr for $name {
                type Output = $name;
                fn bitor(self, rhs: $name) -> $name {
                    $name(self.0 | rhs.0)
                }
            }
        }
    }
    pub(crate) use bitflags;
}

/// Architecture-flags block: alignment descriptor + 16-bit machine code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchFlags {
    pub alignment_desc: u64,
    pub machine: u16,
    pub reserved: [u8; 6],
}

/// Fixed-size (4 KiB) pool header, common to every part of every pool type.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct PoolHdr {
    pub signature: [u8; POOL_HDR_SIG_LEN],
    pub major: u32,
    pub compat_features: u32,
    pub incompat_features: u32,
    pub ro_compat_features: u32,
    pub arch_flags: ArchFlags,
    pub crtime: u64,
    pub uuid: [u8; POOL_HDR_UUID_LEN],
    pub poolset_uuid: [u8; POOL_HDR_UUID_LEN],
    pub prev_part_uuid: [u8; POOL_HDR_UUID_LEN],
    pub next_part_uuid: [u8; POOL_HDR_UUID_LEN],
    pub prev_repl_uuid: [u8; POOL_HDR_UUID_LEN],
    pub next_repl_uuid: [u8; POOL_HDR_UUID_LEN],
    pub unused: Array<u8, 3944>,
    pub checksum: u64,
}

impl Default for PoolHdr {
    fn default() -> Self {
        PoolHdr {
            signature: [0; POOL_HDR_SIG_LEN],
            major: 0,
            compat_features: 0,
            incompat_features: 0,
            ro_compat_features: 0,
            arch_flags: ArchFlags::default(),
            crtime: 0,
            uuid: [0; POOL_HDR_UUID_LEN],
            poolset_uuid: [0; POOL_HDR_UUID_LEN],
            prev_part_uuid: [0; POOL_HDR_UUID_LEN],
            next_part_uuid: [0; POOL_HDR_UUID_LEN],
            prev_repl_uuid: [0; POOL_HDR_UUID_LEN],
            next_repl_uuid: [0; POOL_HDR_UUID_LEN],
            unused: Array::default(),
            checksum: 0,
        }
    }
}

impl std::fmt::Debug for PoolHdr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PoolHdr")
            .field("signature", &String::from_utf8_lossy(&self.signature))
            .field("major", &self.major)
            .field("compat_features", &self.compat_features)
            .field("incompat_features", &self.incompat_features)
            .field("ro_compat_features", &self.ro_compat_features)
            .field("crtime", &self.crtime)
            .field("uuid", &uuid_str(&self.uuid))
            .field("poolset_uuid", &uuid_str(&self.poolset_uuid))
            .field("checksum", &self.checksum)
            .finish()
    }
}

pub fn uuid_str(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).to_string()
}

/// Log pool header: pool header followed by the log's write cursors.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LogHdr {
    pub hdr: PoolHdr,
    pub start_offset: u64,
    pub end_offset: u64,
    pub write_offset: u64,
}

impl Default for LogHdr {
    fn default() -> Self {
        LogHdr { hdr: PoolHdr::default(), start_offset: 0, end_offset: 0, write_offset: 0 }
    }
}

/// Blk pool header: pool header followed by the block size.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlkHdr {
    pub hdr: PoolHdr,
    pub bsize: u32,
    pub unused: [u8; 4],
}

impl Default for BlkHdr {
    fn default() -> Self {
        BlkHdr { hdr: PoolHdr::default(), bsize: 0, unused: [0; 4] }
    }
}

/// BTT arena info header (spec §3). Exactly 4 KiB on disk.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct BttInfo {
    pub sig: [u8; BTT_INFO_SIG_LEN],
    pub uuid: [u8; 16],
    pub parent_uuid: [u8; 16],
    pub flags: u32,
    pub major: u16,
    pub minor: u16,
    pub external_lbasize: u32,
    pub external_nlba: u32,
    pub internal_lbasize: u32,
    pub internal_nlba: u32,
    pub nfree: u32,
    pub infosize: u32,
    pub nextoff: u64,
    pub dataoff: u64,
    pub mapoff: u64,
    pub flogoff: u64,
    pub infooff: u64,
    pub unused: Array<u8, 3968>,
    pub checksum: u64,
}

impl Default for BttInfo {
    fn default() -> Self {
        BttInfo {
            sig: [0; BTT_INFO_SIG_LEN],
            uuid: [0; 16],
            parent_uuid: [0; 16],
            flags: 0,
            major: 0,
            minor: 0,
            external_lbasize: 0,
            external_nlba: 0,
            internal_lbasize: 0,
            internal_nlba: 0,
            nfree: 0,
            infosize: 0,
            nextoff: 0,
            dataoff: 0,
            mapoff: 0,
            flogoff: 0,
            infooff: 0,
            unused: Array::default(),
            checksum: 0,
        }
    }
}

impl std::fmt::Debug for BttInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BttInfo")
            .field("sig", &String::from_utf8_lossy(&self.sig))
            .field("uuid", &uuid_str(&self.uuid))
            .field("parent_uuid", &uuid_str(&self.parent_uuid))
            .field("external_lbasize", &self.external_lbasize)
            .field("external_nlba", &self.external_nlba)
            .field("internal_lbasize", &self.internal_lbasize)
            .field("internal_nlba", &self.internal_nlba)
            .field("nfree", &self.nfree)
            .field("nextoff", &self.nextoff)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// One 32-byte BTT flog record: `(lba, old_map, new_map, seq)` plus
/// reserved padding so a pair of records lands on the 64-byte alignment
/// the flog pairs require (spec §3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BttFlog {
    pub lba: u32,
    pub old_map: u32,
    pub new_map: u32,
    pub seq: u32,
    pub reserved: [u8; 16],
}

impl BttFlog {
    pub fn is_zeroed(&self) -> bool {
        self.lba == 0 && self.old_map == 0 && self.new_map == 0 && self.seq == 0
            && self.reserved == [0u8; 16]
    }
}

fn bincode_opts() -> impl Options {
    DefaultOptions::new().with_fixint_encoding().allow_trailing_bytes()
}

/// Serialize a header-family struct to its on-disk little-endian bytes.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode_opts().serialize(value).expect("in-memory struct encoding cannot fail")
}

/// Parse a header-family struct from on-disk bytes.
pub fn decode<T: for<'de> Deserialize<'de>>(buf: &[u8]) -> anyhow::Result<T> {
    Ok(bincode_opts().deserialize(buf)?)
}

/// 64-bit additive Fletcher-style checksum: treats `buf` as an array of
/// little-endian `u32` words, skipping the eight bytes at `csum_offset`
/// (the checksum field itself, treated as zero during the reduction).
pub fn fletcher64(buf: &[u8], csum_offset: usize) -> u64 {
    assert!(buf.len() % 4 == 0, "checksum buffer must be a whole number of u32 words");
    assert!(csum_offset % 4 == 0);

    let skip_word = csum_offset / 4;
    let nwords = buf.len() / 4;
    let mut lo: u32 = 0;
    let mut hi: u32 = 0;

    let mut i = 0;
    while i < nwords {
        if i == skip_word {
            i += 2; // the checksum field is 8 bytes == two u32 words
            continue;
        }
        let word = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        lo = lo.wrapping_add(word);
        hi = hi.wrapping_add(lo);
        i += 1;
    }

    ((hi as u64) << 32) | (lo as u64)
}

/// Computes and stores the checksum of a pool header into its trailing
/// `checksum` field.
pub fn pool_hdr_set_checksum(hdr: &mut PoolHdr) {
    let csum_offset = encoded_offset_of_pool_checksum();
    let mut bytes = encode(hdr);
    bytes[csum_offset..csum_offset + 8].copy_from_slice(&0u64.to_le_bytes());
    hdr.checksum = fletcher64(&bytes, csum_offset);
}

/// Validates a pool header's checksum against its stored value.
pub fn pool_hdr_checksum_valid(hdr: &PoolHdr) -> bool {
    let csum_offset = encoded_offset_of_pool_checksum();
    let mut bytes = encode(hdr);
    bytes[csum_offset..csum_offset + 8].copy_from_slice(&0u64.to_le_bytes());
    fletcher64(&bytes, csum_offset) == hdr.checksum
}

fn encoded_offset_of_pool_checksum() -> usize {
    POOL_HDR_SIZE - 8
}

pub fn btt_info_set_checksum(info: &mut BttInfo) {
    let csum_offset = BTT_INFO_SIZE - 8;
    let mut bytes = encode(info);
    bytes[csum_offset..csum_offset + 8].copy_from_slice(&0u64.to_le_bytes());
    info.checksum = fletcher64(&bytes, csum_offset);
}

pub fn btt_info_checksum_valid(info: &BttInfo) -> bool {
    let csum_offset = BTT_INFO_SIZE - 8;
    let mut bytes = encode(info);
    bytes[csum_offset..csum_offset + 8].copy_from_slice(&0u64.to_le_bytes());
    fletcher64(&bytes, csum_offset) == info.checksum
}

pub const BTT_INFO_SIZE: usize = 4096;

/// Returns a zeroed header with signature, major version, and feature
/// masks set to the defaults for `pool_type`.
pub fn default_pool_hdr(pool_type: PoolType) -> PoolHdr {
    let mut hdr = PoolHdr::default();
    hdr.signature = pool_type.signature();
    hdr.major = match pool_type {
        PoolType::Log => LOG_FORMAT_MAJOR,
        PoolType::Blk | PoolType::BttDev => BLK_FORMAT_MAJOR,
        _ => 0,
    };
    hdr
}

/// Computes BTT geometry for an arena of `arena_size` bytes with
/// `space_left` bytes of pool remaining beyond it, given the donor's
/// `external_lbasize`/`nfree`. Grounded in `btt_info_set` as called from
/// `check_btt_info.c`'s regeneration path.
pub fn btt_info_set(
    info: &mut BttInfo,
    external_lbasize: u32,
    nfree: u32,
    arena_size: u64,
    space_left: u64,
) -> anyhow::Result<()> {
    if external_lbasize < MIN_LBA_SIZE {
        anyhow::bail!("external lbasize {} below minimum {}", external_lbasize, MIN_LBA_SIZE);
    }

    let internal_lbasize = round_up(external_lbasize as u64, BTT_MAP_ENTRY_SIZE.max(64)) as u32;
    let infosize = BTT_INFO_SIZE as u64;

    // Reserve two info headers (primary + backup) and leave the rest for
    // nfree flog pairs, the map, and data, following the arena layout
    // order: [info][map][flog][data...][info backup].
    let usable = arena_size.saturating_sub(2 * infosize);

    // internal_nlba is solved iteratively in the original; we approximate
    // by first estimating from total space, then trimming until the
    // layout fits, which converges immediately because block accounting
    // is linear in internal_nlba.
    let flog_entry_size = round_up(2 * std::mem::size_of::<BttFlog>() as u64, BTT_FLOG_PAIR_ALIGN);
    let flogsize = round_up(nfree as u64 * flog_entry_size, BTT_ALIGNMENT);

    let mut internal_nlba = {
        let data_and_map_budget = usable.saturating_sub(flogsize);
        let per_block = internal_lbasize as u64 + BTT_MAP_ENTRY_SIZE;
        (data_and_map_budget / per_block).max(nfree as u64)
    };
    // internal_nlba must exceed nfree so there is always at least one
    // free block per in-flight write slot.
    if internal_nlba <= nfree as u64 {
        internal_nlba = nfree as u64 + 1;
    }

    let external_nlba = (internal_nlba - nfree as u64) as u32;
    let mapsize = round_up(external_nlba as u64 * BTT_MAP_ENTRY_SIZE, BTT_ALIGNMENT);

    info.external_lbasize = external_lbasize;
    info.internal_lbasize = internal_lbasize;
    info.nfree = nfree;
    info.infosize = infosize as u32;
    info.internal_nlba = internal_nlba as u32;
    info.external_nlba = external_nlba;
    info.infooff = 0;
    info.dataoff = infosize;
    info.mapoff = info.dataoff + internal_nlba * internal_lbasize as u64;
    info.flogoff = info.mapoff + mapsize;
    info.nextoff = if space_left >= arena_size { arena_size } else { 0 };

    Ok(())
}

pub fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

pub fn round_down(value: u64, align: u64) -> u64 {
    value / align * align
}

/// Converts a raw little-endian BTT map buffer into host-order `u32`
/// entries.
pub fn btt_map_to_host(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect()
}

/// Converts host-order BTT map entries back to little-endian bytes.
pub fn btt_map_to_le(entries: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 4);
    for e in entries {
        out.extend_from_slice(&e.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_hdr_roundtrip_size() {
        let hdr = PoolHdr::default();
        let bytes = encode(&hdr);
        assert_eq!(bytes.len(), POOL_HDR_SIZE);
        let back: PoolHdr = decode(&bytes).unwrap();
        assert_eq!(back.signature, hdr.signature);
    }

    #[test]
    fn btt_info_roundtrip_size() {
        let info = BttInfo::default();
        let bytes = encode(&info);
        assert_eq!(bytes.len(), BTT_INFO_SIZE);
    }

    #[test]
    fn checksum_set_then_valid() {
        let mut hdr = default_pool_hdr(PoolType::Log);
        hdr.uuid = [7; 16];
        pool_hdr_set_checksum(&mut hdr);
        assert!(pool_hdr_checksum_valid(&hdr));
        hdr.uuid[0] ^= 0xff;
        assert!(!pool_hdr_checksum_valid(&hdr));
    }

    #[test]
    fn checksum_is_host_endianness_independent() {
        // The checksum must depend only on byte content, not on whether
        // this host happens to be little- or big-endian; `from_le_bytes`
        // guarantees that regardless of what `u32::from_ne_bytes` would
        // have done on a big-endian host.
        let buf = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, 0, 0, 0, 0];
        let a = fletcher64(&buf, 8);
        let b = fletcher64(&buf.clone(), 8);
        assert_eq!(a, b);
    }

    #[test]
    fn btt_map_entry_round_trip() {
        let entries = vec![0u32, 5, BTT_MAP_ENTRY_ERROR | 3];
        let le = btt_map_to_le(&entries);
        let back = btt_map_to_host(&le);
        assert_eq!(entries, back);
    }
}
