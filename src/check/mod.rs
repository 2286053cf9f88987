#![allow(dead_code)]
//! Check driver (C4): the ordered sequence of check steps, the
//! ASK_QUESTIONS / PROCESS_ANSWERS state machine, and the session type
//! that check_pool_hdr/log_blk_hdr/btt_info/btt_map_flog/write hang off
//! of (spec §4.4).

mod btt_info;
mod btt_map_flog;
mod log_blk_hdr;
mod pool_hdr;
mod write;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::codec::{BttFlog, BttInfo, PoolType};
use crate::error::CheckError;
use crate::poolset::PoolSet;

/// Arguments accepted by `check_init` (spec §6).
#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub path: PathBuf,
    pub pool_type: PoolType,
    pub repair: bool,
    pub dry_run: bool,
    pub advanced: bool,
    pub always_yes: bool,
    pub backup_path: Option<PathBuf>,
}

impl CheckArgs {
    pub fn validate(&self) -> Result<(), CheckError> {
        if (self.dry_run || self.advanced) && !self.repair {
            return Err(CheckError::Format(
                "dry_run or advanced requires repair=true".into(),
            ));
        }
        if self.dry_run && self.backup_path.is_some() {
            return Err(CheckError::Format(
                "dry_run and backup_path are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// Final outcome of a check session (spec §3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Consistent,
    NotConsistent,
    AskQuestions,
    ProcessAnswers,
    Repaired,
    CannotRepair,
    Error,
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
    Question,
}

/// One unit of caller-visible output from `check_step`. Questions carry a
/// human message split by `|` into observation and prompt per spec §7.
#[derive(Debug, Clone)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
    pub question_id: Option<u32>,
}

/// A BTT arena discovered during the BTT-info step (spec §3).
pub struct Arena {
    pub id: u32,
    pub offset: u64,
    pub btt_info: BttInfo,
    pub flog: Vec<BttFlog>,
    pub map: Vec<u32>,
    pub valid: bool,
    pub zeroed: bool,
}

/// Pending fix tied to a question id, dispatched once the caller answers.
pub(crate) enum PendingFix {
    PoolHdr(pool_hdr::Fix),
    LogBlkHdr(log_blk_hdr::Fix),
    BttInfo(btt_info::Fix),
    BttMapFlog(btt_map_flog::Fix),
}

pub(crate) struct PendingItem {
    pub id: u32,
    pub message: String,
    pub fix: PendingFix,
    pub answer: Option<bool>,
}

/// Step cursor: which (replica, part) or arena the current step is
/// working on ("instep location", spec §3/§9).
#[derive(Default, Clone, Copy)]
pub(crate) struct Cursor {
    pub replica: usize,
    pub part: usize,
    pub arena: usize,
}

const STEP_BACKUP: usize = 0;
const STEP_POOL_HDR: usize = 1;
const STEP_LOG_BLK_HDR: usize = 2;
const STEP_BTT_INFO: usize = 3;
const STEP_BTT_MAP_FLOG: usize = 4;
const STEP_WRITE: usize = 5;
const STEP_DONE: usize = 6;

pub struct Session {
    pub args: CheckArgs,
    pub(crate) poolset: PoolSet,
    pub pool_type: PoolType,
    pub result: CheckResult,
    pub(crate) step: usize,
    pub(crate) cursor: Cursor,
    pub(crate) outbox: VecDeque<Status>,
    pub(crate) pending: Vec<PendingItem>,
    pub(crate) pending_cursor: usize,
    pub(crate) next_question_id: u32,
    pub(crate) arenas: Vec<Arena>,
    pub(crate) blk_no_layout: bool,
    pub(crate) bttc: Option<BttInfo>,
    pub(crate) mtime: SystemTime,
    pub(crate) uuid_regenerated: bool,
    pub(crate) dirty: bool,
    last_error: Option<String>,
}

impl Session {
    pub fn errormsg(&self) -> String {
        self.last_error.clone().unwrap_or_default()
    }

    fn fail(&mut self, result: CheckResult, msg: impl Into<String>) -> Status {
        let msg = msg.into();
        self.result = result;
        self.last_error = Some(msg.clone());
        warn!(%msg, ?result, "check failed");
        Status { kind: StatusKind::Error, message: msg, question_id: None }
    }

    fn info(&mut self, msg: impl Into<String>) -> Status {
        let msg = msg.into();
        debug!(%msg, "check info");
        Status { kind: StatusKind::Info, message: msg, question_id: None }
    }

    /// Records a defect found while `repair=false`: the session can never
    /// end `Repaired`, but this is an informational finding, not an error
    /// (spec §4.4 "repair=false forbids questions"; §7 `format_error`).
    pub(crate) fn not_consistent(&mut self, msg: impl Into<String>) -> Status {
        let msg = msg.into();
        if self.result == CheckResult::Consistent {
            self.result = CheckResult::NotConsistent;
        }
        info!(%msg, "check finding (repair disabled)");
        Status { kind: StatusKind::Info, message: msg, question_id: None }
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next_question_id;
        self.next_question_id += 1;
        id
    }

    /// Enqueues a question tied to `fix`; under `always_yes` the answer is
    /// deposited immediately (spec §4.4 "always_yes short-circuits").
    pub(crate) fn ask(&mut self, message: impl Into<String>, fix: PendingFix) {
        let id = self.next_id();
        let message = message.into();
        let answer = if self.args.always_yes { Some(true) } else { None };
        self.pending.push(PendingItem { id, message, fix, answer });
    }

    /// Gate between asking a question and flagging `NOT_CONSISTENT`: with
    /// `repair=false` a detected defect must never become a question
    /// (spec §4.4, §7).
    pub(crate) fn raise(&mut self, message: impl Into<String>, fix: PendingFix) {
        if self.args.repair {
            self.ask(message, fix);
        } else {
            let status = self.not_consistent(message);
            self.outbox.push_back(status);
        }
    }
}

/// Validates args and parses/opens the pool-set, returning a fresh
/// session (spec §6 `check_init`).
pub fn check_init(args: CheckArgs) -> Result<Session, CheckError> {
    args.validate()?;

    let mut poolset = PoolSet::parse(&args.path).map_err(|e| CheckError::Format(e.to_string()))?;
    let rdonly = !args.repair || args.dry_run;
    poolset.open(rdonly).map_err(|e| CheckError::Io {
        path: args.path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;

    let mtime = std::fs::metadata(&args.path).and_then(|m| m.modified()).unwrap_or(SystemTime::now());

    info!(path = %args.path.display(), pool_type = ?args.pool_type, "check session initialised");

    Ok(Session {
        pool_type: args.pool_type,
        args,
        poolset,
        result: CheckResult::Consistent,
        step: STEP_BACKUP,
        cursor: Cursor::default(),
        outbox: VecDeque::new(),
        pending: Vec::new(),
        pending_cursor: 0,
        next_question_id: 0,
        arenas: Vec::new(),
        blk_no_layout: false,
        bttc: None,
        mtime,
        uuid_regenerated: false,
        dirty: false,
        last_error: None,
    })
}

/// Caller writes back `"yes"`/`"no"` for the question identified by
/// `question_id` before calling `check_step` again (spec §4.4).
pub fn check_answer(session: &mut Session, question_id: u32, answer: &str) -> Result<(), CheckError> {
    let yes = match answer {
        "yes" => true,
        "no" => false,
        other => return Err(CheckError::UnanswerableQuestion(other.to_string())),
    };
    for item in &mut session.pending {
        if item.id == question_id {
            item.answer = Some(yes);
            return Ok(());
        }
    }
    Err(CheckError::Internal("answered question id not found"))
}

/// Drives the session forward by one observable unit: an info/error
/// message, a question, or `None` once the session has ended.
pub fn check_step(session: &mut Session) -> Result<Option<Status>, CheckError> {
    loop {
        if let Some(status) = session.outbox.pop_front() {
            return Ok(Some(status));
        }

        if !session.pending.is_empty() {
            // Surface the next unanswered question, or apply all fixes
            // once every question in this batch has an answer.
            if let Some(item) = session.pending.get(session.pending_cursor) {
                if item.answer.is_none() {
                    session.result = CheckResult::AskQuestions;
                    let status = Status {
                        kind: StatusKind::Question,
                        message: item.message.clone(),
                        question_id: Some(item.id),
                    };
                    session.pending_cursor += 1;
                    return Ok(Some(status));
                }
            }
            session.result = CheckResult::ProcessAnswers;
            apply_pending(session)?;
            continue;
        }

        if session.step >= STEP_DONE {
            return Ok(None);
        }

        run_step(session)?;
    }
}

fn apply_pending(session: &mut Session) -> Result<(), CheckError> {
    let items = std::mem::take(&mut session.pending);
    session.pending_cursor = 0;
    for item in items {
        match item.answer {
            Some(true) => match item.fix {
                PendingFix::PoolHdr(f) => pool_hdr::apply_fix(session, f)?,
                PendingFix::LogBlkHdr(f) => log_blk_hdr::apply_fix(session, f)?,
                PendingFix::BttInfo(f) => btt_info::apply_fix(session, f)?,
                PendingFix::BttMapFlog(f) => btt_map_flog::apply_fix(session, f)?,
            },
            Some(false) => {
                let msg = format!("repair refused: {}", item.message);
                session.outbox.push_back(session.fail(CheckResult::CannotRepair, msg.clone()));
                return Err(CheckError::RepairRefused(msg));
            }
            None => unreachable!("apply_pending called with an unanswered item"),
        }
        session.dirty = true;
    }
    Ok(())
}

fn run_step(session: &mut Session) -> Result<(), CheckError> {
    match session.step {
        STEP_BACKUP => {
            run_backup(session)?;
            session.step = STEP_POOL_HDR;
        }
        STEP_POOL_HDR => {
            if applies_to(session, TypeScope::LogBlkUnknown) {
                pool_hdr::run(session)?;
            }
            session.step = STEP_LOG_BLK_HDR;
        }
        STEP_LOG_BLK_HDR => {
            if applies_to(session, TypeScope::LogBlk) {
                log_blk_hdr::run(session)?;
            }
            session.step = STEP_BTT_INFO;
        }
        STEP_BTT_INFO => {
            if applies_to(session, TypeScope::BlkFamily) {
                btt_info::run(session)?;
            }
            session.step = STEP_BTT_MAP_FLOG;
        }
        STEP_BTT_MAP_FLOG => {
            if applies_to(session, TypeScope::BlkFamily) && !session.blk_no_layout {
                btt_map_flog::run(session)?;
            }
            session.step = STEP_WRITE;
        }
        STEP_WRITE => {
            write::run(session)?;
            session.step = STEP_DONE;
            if session.result == CheckResult::Consistent && session.dirty {
                session.result = CheckResult::Repaired;
            }
            let msg = format!("check finished: {:?}", session.result);
            session.outbox.push_back(session.info(msg));
        }
        _ => unreachable!(),
    }
    Ok(())
}

enum TypeScope {
    LogBlkUnknown,
    LogBlk,
    BlkFamily,
}

fn applies_to(session: &Session, scope: TypeScope) -> bool {
    match scope {
        TypeScope::LogBlkUnknown => {
            matches!(session.pool_type, PoolType::Log | PoolType::Blk | PoolType::Unknown)
        }
        TypeScope::LogBlk => matches!(session.pool_type, PoolType::Log | PoolType::Blk),
        TypeScope::BlkFamily => matches!(session.pool_type, PoolType::Blk | PoolType::BttDev),
    }
}

fn run_backup(session: &mut Session) -> Result<(), CheckError> {
    if let Some(backup) = session.args.backup_path.clone() {
        if session.args.repair && !session.args.dry_run {
            info!(backup = %backup.display(), "copying source image to backup path");
            std::fs::copy(&session.args.path, &backup).map_err(|e| CheckError::Io {
                path: backup.display().to_string(),
                source: e,
            })?;
            session.outbox.push_back(session.info(format!("backed up to {}", backup.display())));
        }
    }
    Ok(())
}

/// `check_end`: unmaps/closes the pool-set and returns the final result
/// (spec §6). `last_status`, if the caller is mid-question, is treated as
/// a cancellation of that question.
pub fn check_end(session: &mut Session) -> CheckResult {
    session.poolset.close();
    match session.result {
        CheckResult::AskQuestions | CheckResult::ProcessAnswers => CheckResult::CannotRepair,
        other => other,
    }
}
