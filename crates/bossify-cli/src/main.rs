mod cmd_boss;
mod cmd_check;
mod cmd_history;
mod cmd_rebase;
mod cmd_rebase_all;

use bossify_engine::{BossError, TimeMode};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "bossify", version, about = "Vanity-hash rewriting for git history")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mine a vanity digest for HEAD and amend its message in place
    Boss {
        /// Choice template, e.g. "{fix|Fix}: {typo|spelling}". Optional when
        /// HEAD already has a saved record.
        template: Option<String>,
    },
    /// Rewrite one ancestor commit and replay everything after it
    Rebase {
        /// Target commit (ref or id); must be an ancestor of HEAD
        commit: String,
        /// Choice template; optional when the commit has a saved record
        template: Option<String>,
        /// Timestamp handling for the rewrite and the replays
        #[arg(long, value_enum, default_value = "preserve")]
        time: TimeArg,
    },
    /// Rewrite every eligible commit using previously saved templates
    RebaseAll {
        /// Timestamp handling for the rewrites and the replays
        #[arg(long, value_enum, default_value = "preserve")]
        time: TimeArg,
    },
    /// List saved bossifications, newest first
    History {
        /// Output as JSON lines (one record per line)
        #[arg(long)]
        json: bool,
    },
    /// Audit a template locally: variant count, entropy bits, verdict
    Check {
        /// Choice template to audit
        template: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TimeArg {
    /// Keep original author/committer timestamps
    Preserve,
    /// Stamp rewritten and replayed commits with the current time
    Now,
}

impl From<TimeArg> for TimeMode {
    fn from(arg: TimeArg) -> Self {
        match arg {
            TimeArg::Preserve => TimeMode::Preserve,
            TimeArg::Now => TimeMode::Now,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    match cli.cmd {
        Command::Boss { template } => cmd_boss::execute(&cwd, template.as_deref()),
        Command::Rebase {
            commit,
            template,
            time,
        } => cmd_rebase::execute(&cwd, &commit, template.as_deref(), time.into()),
        Command::RebaseAll { time } => cmd_rebase_all::execute(&cwd, time.into()),
        Command::History { json } => cmd_history::execute(&cwd, json),
        Command::Check { template } => cmd_check::execute(&template),
    }
}

/// Entropy rejection gets its own exit code so callers can tell "change the
/// template" apart from every other failure.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BossError>() {
        Some(BossError::InsufficientEntropy { .. }) => 2,
        _ => 1,
    }
}
