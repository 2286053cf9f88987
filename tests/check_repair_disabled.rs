mod common;

use pmempool_check::check::{check_end, check_init, check_step, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::PoolType;

#[test]
fn flags_not_consistent_without_asking_when_repair_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.pool");
    let data_size = 8192u64;
    // Cursors that don't match the canonical layout, same defect
    // `repairs_log_write_cursors` exercises with repair enabled.
    common::build_log_pool(&path, 999, 111, 5, data_size);

    let args = CheckArgs {
        path: path.clone(),
        pool_type: PoolType::Log,
        repair: false,
        dry_run: false,
        advanced: false,
        always_yes: true,
        backup_path: None,
    };
    let mut session = check_init(args).unwrap();
    while let Some(status) = check_step(&mut session).unwrap() {
        assert_ne!(status.kind, StatusKind::Question, "repair=false must never raise a question");
    }
    assert_eq!(check_end(&mut session), CheckResult::NotConsistent);

    // The file is untouched: no repair was attempted.
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut std::fs::File::open(&path).unwrap(), &mut bytes).unwrap();
    let off = pmempool_check::codec::POOL_HDR_SIZE;
    let start = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
    assert_eq!(start, 999);
}
