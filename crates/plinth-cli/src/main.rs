use clap::{Parser, Subcommand};
use plinth_core::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "plinth", version, about = "Plinth privileged action broker")]
struct Cli {
    /// Path to plinth.yaml
    #[arg(long, short, global = true, env = "PLINTH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect the action registry (list/describe/check)
    Actions {
        #[command(subcommand)]
        cmd: ActionsCommand,
    },

    /// Run one action through the broker.
    Run {
        /// Action name
        name: String,

        /// Argument as key=value, coerced to the type the action declares. Repeatable.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        /// Arguments as a JSON object; --arg values are applied on top.
        #[arg(long = "args-json", value_name = "JSON")]
        args_json: Option<String>,

        /// Print a JSON summary instead of passing output through
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Read the audit trail
    Audit {
        #[command(subcommand)]
        cmd: AuditCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ActionsCommand {
    /// List registered actions
    List,

    /// Describe one action by name
    Describe { action_name: String },

    /// Load the registry and report skipped manifests
    Check,
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Print audit records, oldest first
    List {
        /// Only records for this action
        #[arg(long)]
        action: Option<String>,

        /// Only records with this outcome (completed, rejected, failed, timed_out)
        #[arg(long)]
        outcome: Option<String>,

        /// Show at most this many of the newest matching records
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// One JSON object per line
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries action output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Actions { cmd } => match cmd {
            ActionsCommand::List => commands::actions::list(&cli.config)?,
            ActionsCommand::Describe { action_name } => {
                commands::actions::describe(&cli.config, &action_name)?
            }
            ActionsCommand::Check => {
                if !commands::actions::check(&cli.config)? {
                    std::process::exit(1);
                }
            }
        },
        Command::Run {
            name,
            args,
            args_json,
            json,
        } => {
            let code = commands::run::run(&cli.config, &name, &args, args_json.as_deref(), json).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Audit { cmd } => match cmd {
            AuditCommand::List {
                action,
                outcome,
                limit,
                json,
            } => commands::audit::list(&cli.config, action, outcome.as_deref(), limit, json).await?,
        },
    }

    Ok(())
}
