mod common;

use std::fs;

use pmempool_check::codec::{self, PoolHdr};
use pmempool_check::replica::{sync, SyncArgs, SyncFlags};

#[test]
fn rebuilds_broken_replica_from_healthy_peer() {
    let dir = tempfile::tempdir().unwrap();
    let p0 = dir.path().join("p0");
    let p1 = dir.path().join("p1");
    common::build_log_pool(&p0, 4096, 8192, 4096, 8192);
    common::build_log_pool(&p1, 4096, 8192, 4096, 8192);

    // Break p1's header checksum so it's no longer the healthy replica.
    let mut bytes = fs::read(&p1).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&p1, &bytes).unwrap();

    let desc = dir.path().join("log.set");
    fs::write(
        &desc,
        format!(
            "PMEMPOOLSET\n12K {}\nREPLICA\n12K {}\n",
            p0.display(),
            p1.display()
        ),
    )
    .unwrap();

    sync(SyncArgs {
        poolset_path: desc,
        replto: 1,
        replfrom: 0,
        partto: None,
        partfrom: None,
        flags: SyncFlags::default(),
    })
    .unwrap();

    let rebuilt = fs::read(&p1).unwrap();
    let hdr: PoolHdr = codec::decode(&rebuilt[..codec::POOL_HDR_SIZE]).unwrap();
    assert!(codec::pool_hdr_checksum_valid(&hdr));

    // Data region carries the same write cursors as the healthy source.
    let off = codec::POOL_HDR_SIZE;
    let start = u64::from_le_bytes(rebuilt[off..off + 8].try_into().unwrap());
    assert_eq!(start, 4096);
}
