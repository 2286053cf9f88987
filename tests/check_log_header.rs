mod common;

use std::io::Read;

use pmempool_check::check::{check_answer, check_end, check_init, check_step, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::PoolType;

#[test]
fn repairs_log_write_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.pool");
    let data_size = 8192u64;
    common::build_log_pool(&path, 999, 111, 5, data_size);

    let args = CheckArgs {
        path: path.clone(),
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

    let mut bytes = Vec::new();
    std::fs::File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
    let off = pmempool_check::codec::POOL_HDR_SIZE;
    let cursors = &bytes[off..off + 24];
    let start = u64::from_le_bytes(cursors[0..8].try_into().unwrap());
    let end = u64::from_le_bytes(cursors[8..16].try_into().unwrap());
    let write = u64::from_le_bytes(cursors[16..24].try_into().unwrap());

    assert_eq!(start, 4096);
    assert_eq!(end, data_size);
    assert!(write >= start && write <= end);
}
