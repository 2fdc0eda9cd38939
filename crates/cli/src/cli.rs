use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bulkload_core::{JobId, IMPORT_COMPLETED};

/// Operator tool for the bulk product import pipeline.
///
/// Submits CSV files to the import queue, follows job progress and manages
/// webhook subscriptions. Connection settings come from the environment
/// (`DATABASE_URL` or `PG_*`, optionally prefixed by the active profile).
#[derive(Parser, Debug)]
#[command(name = "bulkload", version, about = "Bulk CSV product imports")]
pub struct CliArgs {
    /// Config profile to use (overrides BULKLOAD_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stage a CSV file and queue it for import; prints the job id
    Submit {
        /// Path to a .csv file
        file: PathBuf,

        /// Keep printing progress until the job finishes
        #[arg(long)]
        follow: bool,
    },

    /// Show progress of an import job
    Progress {
        job_id: JobId,

        /// Poll until the job reaches 100% or fails
        #[arg(long)]
        follow: bool,

        /// Poll interval in milliseconds when following
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Manage webhook subscriptions
    Webhooks {
        #[command(subcommand)]
        action: WebhookCommand,
    },

    /// Show import queue depth
    Queue,

    /// Apply database migrations
    Migrate,

    /// Delete expired progress entries
    Reap,
}

#[derive(Subcommand, Debug)]
pub enum WebhookCommand {
    /// Register an endpoint
    Add {
        url: String,

        /// Event kind to subscribe to
        #[arg(default_value = IMPORT_COMPLETED)]
        event_kind: String,

        /// Register the subscription disabled
        #[arg(long)]
        inactive: bool,
    },

    /// List all subscriptions
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a subscription by id
    Remove { id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_progress_follow() {
        let id = JobId::new();
        let args =
            CliArgs::try_parse_from(["bulkload", "progress", &id.to_string(), "--follow"]).unwrap();
        match args.command {
            Command::Progress { job_id, follow, interval_ms } => {
                assert_eq!(job_id, id);
                assert!(follow);
                assert_eq!(interval_ms, 1000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_job_id() {
        assert!(CliArgs::try_parse_from(["bulkload", "progress", "nope"]).is_err());
    }

    #[test]
    fn webhook_add_defaults_to_import_completed() {
        let args =
            CliArgs::try_parse_from(["bulkload", "webhooks", "add", "https://example.com/h"])
                .unwrap();
        match args.command {
            Command::Webhooks {
                action: WebhookCommand::Add { url, event_kind, inactive },
            } => {
                assert_eq!(url, "https://example.com/h");
                assert_eq!(event_kind, "job.import_completed");
                assert!(!inactive);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
