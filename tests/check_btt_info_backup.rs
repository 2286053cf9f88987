mod common;

use pmempool_check::check::{check_answer, check_end, check_init, check_step, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::{self, BttInfo, PoolType};

#[test]
fn restores_primary_btt_info_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blk.pool");
    let pool = common::build_blk_pool(&path, 512, true);

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
    let info_off = pool.arena_offset as usize;
    let info_bytes = &bytes[info_off..info_off + codec::BTT_INFO_SIZE];
    let restored: BttInfo = codec::decode(info_bytes).unwrap();

    assert!(codec::btt_info_checksum_valid(&restored));
    assert_eq!(restored.external_lbasize, pool.info.external_lbasize);
}
