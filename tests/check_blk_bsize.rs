mod common;

use pmempool_check::check::{check_answer, check_end, check_init, check_step, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::PoolType;

#[test]
fn repairs_mismatched_bsize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blk.pool");
    let pool = common::build_blk_pool(&path, 999, false);

    let args = CheckArgs {
        path: path.clone(),
        pool_type: PoolType::Blk,
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

    let bytes = std::fs::read(&path).unwrap();
    let off = pmempool_check::codec::POOL_HDR_SIZE;
    let bsize = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
    assert_eq!(bsize, pool.info.external_lbasize);
}
