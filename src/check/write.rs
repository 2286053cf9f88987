//! Write-back step (C9): resyncs BTT arena `parent_uuid`/checksum after a
//! pool-header UUID regeneration, then commits every mapped header to
//! disk. The map/flog and pool-header fixes themselves are already
//! written through in their own steps; this is the final consistency
//! pass before `check_end`.

use super::btt_info::scan_arenas;
use super::{PoolType, Session};
use crate::codec;
use crate::error::CheckError;

pub(crate) fn run(session: &mut Session) -> Result<(), CheckError> {
    if session.uuid_regenerated && matches!(session.pool_type, PoolType::Blk | PoolType::BttDev) {
        let nrepl = session.poolset.nreplicas();
        let pool_uuid = *session.poolset.poolset_uuid.as_bytes();
        for r in 0..nrepl {
            for (offset, mut info) in scan_arenas(session, r) {
                if info.parent_uuid != pool_uuid {
                    info.parent_uuid = pool_uuid;
                    codec::btt_info_set_checksum(&mut info);
                    let bytes = codec::encode(&info);
                    session
                        .poolset
                        .write(r, offset, &bytes)
                        .map_err(|e| CheckError::Format(e.to_string()))?;
                    session.dirty = true;
                }
            }
        }
    }

    let nrepl = session.poolset.nreplicas();
    for r in 0..nrepl {
        let nparts = session.poolset.replicas[r].parts.len();
        for p in 0..nparts {
            session
                .poolset
                .msync_header(r, p)
                .map_err(|e| CheckError::Format(e.to_string()))?;
        }
    }
    Ok(())
}
