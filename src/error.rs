use thiserror::Error;

/// Errors raised while validating caller-supplied arguments to
/// `check_init`, `sync`, or `transform`.
#[derive(Debug, Error)]
pub enum ArgError {
    #[error("dry_run or advanced requires repair=true")]
    DryRunWithoutRepair,
    #[error("dry_run and backup_path are mutually exclusive")]
    DryRunWithBackup,
    #[error("pool type flags do not contain the requested pool type")]
    TypeNotInFlags,
    #[error("replto and replfrom must differ")]
    SameReplica,
    #[error("replica index {0} is out of range")]
    ReplicaOutOfRange(usize),
    #[error("dry-run and keep-orig are mutually exclusive")]
    DryRunWithKeepOrig,
    #[error("source and destination pool-sets have different replica counts")]
    ReplicaCountMismatch,
}

/// Errors surfaced while driving the check pipeline.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Format(String),
    #[error("caller answered 'no' to a required fix: {0}")]
    RepairRefused(String),
    #[error("answer must be 'yes' or 'no', got {0:?}")]
    UnanswerableQuestion(String),
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl From<ArgError> for CheckError {
    fn from(e: ArgError) -> Self {
        CheckError::Format(e.to_string())
    }
}

/// Classified outcomes of a replica-sync operation, matching the
/// original header's `SyncResult`-style enumeration (spec.md §6).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("internal error")]
    InternalErr,
    #[error("invalid argument")]
    WrongArg,
    #[error("wrong replica number")]
    WrongReplNum,
    #[error("could not delete part file")]
    PartFileDelErr,
    #[error("could not create part file")]
    PartFileCreateErr,
    #[error("could not create replica")]
    RepCreateErr,
    #[error("could not open replica")]
    RepOpenErr,
    #[error("insufficient target memory")]
    InsufTargetMem,
    #[error("could not update uuids")]
    CannotUuidsUpdate,
    #[error("operation performed on a poolset file, not a single pool file")]
    InPoolsetErr,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Arg(#[from] ArgError),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Format(String),
}
