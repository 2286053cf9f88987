//! Thin CLI glue over the library: parses arguments with `clap`, drives a
//! `check` session to completion (answering `yes` to every question when
//! `--yes` is given, otherwise prompting on stdin), and reports the
//! outcome with a process exit code a caller script can branch on.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pmempool_check::check::{self, CheckArgs, CheckResult, StatusKind};
use pmempool_check::codec::PoolType;
use pmempool_check::replica::{sync, transform, SyncArgs, SyncFlags, TransformArgs, TransformFlags};

#[derive(Parser)]
#[command(name = "pmempool-check", about = "Persistent-memory pool diagnostic and recovery engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check, and optionally repair, a pool or pool-set.
    Check {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "unknown")]
        pool_type: PoolTypeArg,
        #[arg(short, long)]
        repair: bool,
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short, long)]
        advanced: bool,
        #[arg(short = 'y', long)]
        always_yes: bool,
        #[arg(short, long)]
        backup: Option<PathBuf>,
    },
    /// Rebuild a broken replica in a pool-set from a healthy one.
    Sync {
        poolset: PathBuf,
        #[arg(long)]
        replto: usize,
        #[arg(long)]
        replfrom: usize,
        #[arg(long)]
        partto: Option<usize>,
        #[arg(long)]
        partfrom: Option<usize>,
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short, long)]
        truncate: bool,
        #[arg(short, long)]
        keep_orig: bool,
    },
    /// Reshape a pool-set's part/replica layout.
    Transform {
        src_poolset: PathBuf,
        dst_poolset: PathBuf,
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short, long)]
        keep_orig: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PoolTypeArg {
    Log,
    Blk,
    Obj,
    BttDev,
    Unknown,
}

impl From<PoolTypeArg> for PoolType {
    fn from(a: PoolTypeArg) -> PoolType {
        match a {
            PoolTypeArg::Log => PoolType::Log,
            PoolTypeArg::Blk => PoolType::Blk,
            PoolTypeArg::Obj => PoolType::Obj,
            PoolTypeArg::BttDev => PoolType::BttDev,
            PoolTypeArg::Unknown => PoolType::Unknown,
        }
    }
}

fn main() -> anyhow::Result<()> {
    pmempool_check::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Check { path, pool_type, repair, dry_run, advanced, always_yes, backup } => {
            run_check(CheckArgs {
                path,
                pool_type: pool_type.into(),
                repair,
                dry_run,
                advanced,
                always_yes,
                backup_path: backup,
            })
        }
        Command::Sync { poolset, replto, replfrom, partto, partfrom, dry_run, truncate, keep_orig } => {
            let mut flags = SyncFlags::default();
            if dry_run {
                flags = flags | SyncFlags::VERIFY;
            }
            if truncate {
                flags = flags | SyncFlags::TRUNCATE;
            }
            if keep_orig {
                flags = flags | SyncFlags::KEEPORIG;
            }
            sync(SyncArgs { poolset_path: poolset, replto, replfrom, partto, partfrom, flags })
                .map_err(|e| anyhow::anyhow!(e))
        }
        Command::Transform { src_poolset, dst_poolset, dry_run, keep_orig } => {
            let mut flags = TransformFlags::default();
            if dry_run {
                flags = flags | TransformFlags::VERIFY;
            }
            if keep_orig {
                flags = flags | TransformFlags::KEEPORIG;
            }
            transform(TransformArgs { src_poolset, dst_poolset, flags }).map_err(|e| anyhow::anyhow!(e))
        }
    }
}

fn run_check(args: CheckArgs) -> anyhow::Result<()> {
    let always_yes = args.always_yes;
    let mut session = check::check_init(args)?;

    while let Some(status) = check::check_step(&mut session)? {
        match status.kind {
            StatusKind::Info => println!("{}", status.message),
            StatusKind::Error => eprintln!("error: {}", status.message),
            StatusKind::Question => {
                let id = status.question_id.expect("question status always carries an id");
                let answer = if always_yes {
                    "yes".to_string()
                } else {
                    prompt(&status.message)?
                };
                check::check_answer(&mut session, id, &answer)?;
            }
        }
    }

    let result = check::check_end(&mut session);
    println!("result: {result:?}");

    std::process::exit(match result {
        CheckResult::Consistent | CheckResult::Repaired => 0,
        CheckResult::NotConsistent => 1,
        _ => 2,
    });
}

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{message} [yes/no] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
