//! Pool header check (C5), grounded in `check_pool_hdr.c`: checksum gate,
//! type/major-version defaults, poolset_uuid majority repair, and the
//! neighbour-UUID web linking parts within a replica and replicas within
//! a pool-set.

use std::collections::HashMap;

use uuid::Uuid;

use super::{PendingFix, Session};
use crate::codec::{self, PoolHdr, PoolType};
use crate::error::CheckError;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum UuidField {
    Self_,
    PrevPart,
    NextPart,
    PrevRepl,
    NextRepl,
}

pub(crate) enum Fix {
    RegenerateChecksum { replica: usize, part: usize },
    FixSignature { replica: usize, part: usize, signature: [u8; 8] },
    SetDefaultMajor { replica: usize, part: usize, major: u32 },
    SetPoolsetUuid { replica: usize, part: usize, uuid: [u8; 16] },
    SetUuidField { replica: usize, part: usize, field: UuidField, value: [u8; 16] },
}

fn load_hdr(session: &mut Session, replica: usize, part: usize) -> Result<PoolHdr, CheckError> {
    let bytes = session.poolset.replicas[replica].parts[part].hdr_bytes().to_vec();
    codec::decode(&bytes).map_err(|e| CheckError::Format(e.to_string()))
}

fn store_hdr(session: &mut Session, replica: usize, part: usize, mut hdr: PoolHdr) -> Result<(), CheckError> {
    codec::pool_hdr_set_checksum(&mut hdr);
    let bytes = codec::encode(&hdr);
    session.poolset.replicas[replica].parts[part].hdr_bytes_mut().copy_from_slice(&bytes);
    session.poolset.replicas[replica].parts[part].uuid = Uuid::from_bytes(hdr.uuid);
    session
        .poolset
        .msync_header(replica, part)
        .map_err(|e| CheckError::Format(e.to_string()))
}

/// Runs the pool-header check for every part of every replica, enqueuing
/// one question per finding (spec §4.4's "one or more questions per
/// step").
pub(crate) fn run(session: &mut Session) -> Result<(), CheckError> {
    session
        .poolset
        .map_headers(!session.args.repair)
        .map_err(|e| CheckError::Format(e.to_string()))?;

    let nrepl = session.poolset.nreplicas();
    let mut headers: Vec<Vec<PoolHdr>> = Vec::with_capacity(nrepl);
    for r in 0..nrepl {
        let nparts = session.poolset.replicas[r].parts.len();
        let mut row = Vec::with_capacity(nparts);
        for p in 0..nparts {
            row.push(load_hdr(session, r, p)?);
        }
        headers.push(row);
    }

    // Checksum, signature, and major-version defaults.
    //
    // Whether to ask about a checksum mismatch unconditionally or only in
    // `advanced` mode is left ambiguous by the design notes (spec §9); we
    // ask unconditionally, since a damaged checksum is the one case where
    // silently trusting the rest of the header's fields is unsafe.
    for r in 0..nrepl {
        for p in 0..headers[r].len() {
            let hdr = headers[r][p];
            if !codec::pool_hdr_checksum_valid(&hdr) {
                session.raise(
                    format!(
                        "replica {r} part {p}: pool header checksum does not match its contents | regenerate crtime and checksum?"
                    ),
                    PendingFix::PoolHdr(Fix::RegenerateChecksum { replica: r, part: p }),
                );
                continue;
            }

            if session.pool_type != PoolType::Unknown {
                let expected = session.pool_type.signature();
                if hdr.signature != expected {
                    session.raise(
                        format!(
                            "replica {r} part {p}: signature does not match the requested pool type | set the expected signature?"
                        ),
                        PendingFix::PoolHdr(Fix::FixSignature { replica: r, part: p, signature: expected }),
                    );
                }
            }

            if hdr.major == 0 {
                let major = codec::default_pool_hdr(session.pool_type).major;
                if major != 0 {
                    session.raise(
                        format!("replica {r} part {p}: major version is unset | set the default major version {major}?"),
                        PendingFix::PoolHdr(Fix::SetDefaultMajor { replica: r, part: p, major }),
                    );
                }
            }
        }
    }

    // poolset_uuid: every part of every replica must agree; repair the
    // minority towards whichever value the majority of parts carries.
    let mut counts: HashMap<[u8; 16], usize> = HashMap::new();
    for row in &headers {
        for h in row {
            *counts.entry(h.poolset_uuid).or_insert(0) += 1;
        }
    }
    if let Some((&majority, _)) = counts.iter().max_by_key(|(_, c)| **c) {
        if majority != [0u8; 16] {
            session.poolset.poolset_uuid = Uuid::from_bytes(majority);
            for r in 0..nrepl {
                for p in 0..headers[r].len() {
                    if headers[r][p].poolset_uuid != majority {
                        session.raise(
                            format!("replica {r} part {p}: poolset_uuid disagrees with the rest of the pool-set | adopt the majority value?"),
                            PendingFix::PoolHdr(Fix::SetPoolsetUuid { replica: r, part: p, uuid: majority }),
                        );
                    }
                }
            }
        }
    }

    // Regenerate a part's own identity if it never got one.
    for r in 0..nrepl {
        for p in 0..headers[r].len() {
            if headers[r][p].uuid == [0u8; 16] {
                let fresh = *Uuid::new_v4().as_bytes();
                session.raise(
                    format!("replica {r} part {p}: part has no uuid | assign a new one?"),
                    PendingFix::PoolHdr(Fix::SetUuidField { replica: r, part: p, field: UuidField::Self_, value: fresh }),
                );
                headers[r][p].uuid = fresh; // so the web below links against it speculatively
            }
        }
    }

    // The neighbour-UUID web: within a replica, parts link to their
    // immediate neighbours; across a pool-set, replicas link the same way
    // through their first part.
    for r in 0..nrepl {
        let nparts = headers[r].len();
        if nparts > 1 {
            for p in 0..nparts {
                let next = headers[r][(p + 1) % nparts].uuid;
                let prev = headers[r][(p + nparts - 1) % nparts].uuid;
                if headers[r][p].next_part_uuid != next {
                    session.raise(
                        format!("replica {r} part {p}: next_part_uuid does not point at the following part | restitch it?"),
                        PendingFix::PoolHdr(Fix::SetUuidField { replica: r, part: p, field: UuidField::NextPart, value: next }),
                    );
                }
                if headers[r][p].prev_part_uuid != prev {
                    session.raise(
                        format!("replica {r} part {p}: prev_part_uuid does not point at the preceding part | restitch it?"),
                        PendingFix::PoolHdr(Fix::SetUuidField { replica: r, part: p, field: UuidField::PrevPart, value: prev }),
                    );
                }
            }
        }
    }
    if nrepl > 1 {
        for r in 0..nrepl {
            let next_r = (r + 1) % nrepl;
            let prev_r = (r + nrepl - 1) % nrepl;
            let next_uuid = headers[next_r][0].uuid;
            let prev_uuid = headers[prev_r][0].uuid;
            if headers[r][0].next_repl_uuid != next_uuid {
                session.raise(
                    format!("replica {r}: next_repl_uuid does not point at the following replica | restitch it?"),
                    PendingFix::PoolHdr(Fix::SetUuidField { replica: r, part: 0, field: UuidField::NextRepl, value: next_uuid }),
                );
            }
            if headers[r][0].prev_repl_uuid != prev_uuid {
                session.raise(
                    format!("replica {r}: prev_repl_uuid does not point at the preceding replica | restitch it?"),
                    PendingFix::PoolHdr(Fix::SetUuidField { replica: r, part: 0, field: UuidField::PrevRepl, value: prev_uuid }),
                );
            }
        }
    }

    Ok(())
}

pub(crate) fn apply_fix(session: &mut Session, fix: Fix) -> Result<(), CheckError> {
    match fix {
        Fix::RegenerateChecksum { replica, part } => {
            let mut hdr = load_hdr(session, replica, part)?;
            if hdr.crtime == 0 {
                hdr.crtime = session
                    .mtime
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
            }
            store_hdr(session, replica, part, hdr)?;
        }
        Fix::FixSignature { replica, part, signature } => {
            let mut hdr = load_hdr(session, replica, part)?;
            hdr.signature = signature;
            store_hdr(session, replica, part, hdr)?;
        }
        Fix::SetDefaultMajor { replica, part, major } => {
            let mut hdr = load_hdr(session, replica, part)?;
            hdr.major = major;
            store_hdr(session, replica, part, hdr)?;
        }
        Fix::SetPoolsetUuid { replica, part, uuid } => {
            let mut hdr = load_hdr(session, replica, part)?;
            hdr.poolset_uuid = uuid;
            store_hdr(session, replica, part, hdr)?;
        }
        Fix::SetUuidField { replica, part, field, value } => {
            let mut hdr = load_hdr(session, replica, part)?;
            match field {
                UuidField::Self_ => {
                    hdr.uuid = value;
                    session.uuid_regenerated = true;
                }
                UuidField::PrevPart => hdr.prev_part_uuid = value,
                UuidField::NextPart => hdr.next_part_uuid = value,
                UuidField::PrevRepl => hdr.prev_repl_uuid = value,
                UuidField::NextRepl => hdr.next_repl_uuid = value,
            }
            store_hdr(session, replica, part, hdr)?;
        }
    }
    Ok(())
}
