mod common;

use std::fs;

use pmempool_check::check::{check_answer, check_end, check_init, check_step, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::{self, PoolHdr, PoolType};

fn read_hdr(path: &std::path::Path) -> PoolHdr {
    let bytes = fs::read(path).unwrap();
    codec::decode(&bytes[..codec::POOL_HDR_SIZE]).unwrap()
}

fn write_hdr(path: &std::path::Path, hdr: &PoolHdr) {
    let mut bytes = fs::read(path).unwrap();
    let hdr_bytes = codec::encode(hdr);
    bytes[..hdr_bytes.len()].copy_from_slice(&hdr_bytes);
    fs::write(path, bytes).unwrap();
}

#[test]
fn repairs_poolset_uuid_and_replica_web() {
    let dir = tempfile::tempdir().unwrap();
    let p0 = dir.path().join("p0");
    let p1 = dir.path().join("p1");
    // Canonical write cursors already in place so only the pool-header
    // step has anything to ask about.
    common::build_log_pool(&p0, 4096, 8192, 4096, 8192);
    common::build_log_pool(&p1, 4096, 8192, 4096, 8192);

    let mut h1 = read_hdr(&p1);
    h1.poolset_uuid = [9; 16];
    h1.uuid = [5; 16];
    codec::pool_hdr_set_checksum(&mut h1);
    write_hdr(&p1, &h1);

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

    let args = CheckArgs {
        path: desc,
        pool_type: PoolType::Log,
        repair: true,
        dry_run: false,
        advanced: false,
        always_yes: true,
        backup_path: None,
    };
    let mut session = check_init(args).unwrap();
    let mut saw_question = false;
    while let Some(status) = check_step(&mut session).unwrap() {
        if status.kind == StatusKind::Question {
            saw_question = true;
            check_answer(&mut session, status.question_id.unwrap(), "yes").unwrap();
        }
    }
    assert!(saw_question);
    assert_eq!(check_end(&mut session), CheckResult::Repaired);

    let h0 = read_hdr(&p0);
    let h1 = read_hdr(&p1);

    assert_eq!(h0.poolset_uuid, h1.poolset_uuid);
    assert_eq!(h0.next_repl_uuid, h1.uuid);
    assert_eq!(h1.prev_repl_uuid, h0.uuid);
}
