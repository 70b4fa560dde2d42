//! jobq CLI - Administrative command line for the jobq job queue
//!
//! Operates directly on the SQLite store as the `admin` identity.

mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;

use jobq_core::application::{
    CancelOptions, GetJobOptions, JobServer, QueueConfig, QueueEngine, QueueGateway, ReadyOptions,
    RemoveOptions, RerunOptions, RestartOptions, SaveOptions,
};
use jobq_core::domain::{
    parse_priority, CalendarSchedule, JobSpec, JobStatus, JobType, RepeatOptions, RepeatWait,
    RetryBackoff, RetryOptions, FOREVER,
};
use jobq_core::domain::job::DEFAULT_WAIT_MS;
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_core::port::{Caller, JobQuery, RoleAuthorizer};
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

const DEFAULT_DB_PATH: &str = "~/.jobq/queue.db";
const CLI_IDENTITY: &str = "jobq-cli";

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "jobq job queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path
    #[arg(long, env = "JOBQ_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new job
    Save(SaveArgs),

    /// Show jobs by id
    Get {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Include the log and failure history
        #[arg(long)]
        history: bool,
    },

    /// List jobs
    List {
        /// Filter by status (repeatable)
        #[arg(short, long)]
        status: Vec<JobStatus>,

        /// Filter by job type (repeatable)
        #[arg(short = 't', long = "type")]
        job_type: Vec<String>,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Pause ready or waiting jobs
    Pause {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Resume paused jobs
    Resume {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Make jobs ready now (or at --time)
    Ready {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Epoch ms at which the jobs become eligible
        #[arg(long)]
        time: Option<i64>,

        /// Resolve every antecedent and void live leases
        #[arg(long)]
        force: bool,
    },

    /// Cancel jobs
    Cancel {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Also cancel what these jobs depend on
        #[arg(long)]
        antecedents: bool,

        /// Leave dependents untouched
        #[arg(long)]
        no_dependents: bool,
    },

    /// Re-arm cancelled or failed jobs
    Restart {
        #[arg(required = true)]
        ids: Vec<String>,

        /// New retry budget
        #[arg(long)]
        retries: Option<i64>,

        /// Retry deadline (epoch ms)
        #[arg(long)]
        until: Option<i64>,

        /// Leave antecedents untouched
        #[arg(long)]
        no_antecedents: bool,

        /// Also restart dependents
        #[arg(long)]
        dependents: bool,
    },

    /// Delete terminal jobs
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Allow any status except running
        #[arg(long)]
        force: bool,
    },

    /// Run a completed job again as a new record
    Rerun {
        id: String,

        #[arg(long, default_value = "0")]
        repeats: i64,

        #[arg(long)]
        until: Option<i64>,

        /// Delay before the new record is eligible (ms)
        #[arg(long, default_value = "0")]
        wait: i64,
    },

    /// Show job counts per status
    Stats,
}

#[derive(Args)]
struct SaveArgs {
    /// Job type
    #[arg(short = 't', long = "type")]
    job_type: String,

    /// Payload as JSON string
    #[arg(long, default_value = "{}")]
    data: String,

    /// Client-chosen id
    #[arg(long)]
    id: Option<String>,

    /// Level name (low, normal, medium, high, critical) or integer
    #[arg(short, long, default_value = "normal")]
    priority: String,

    /// Antecedent job ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    depends: Vec<String>,

    /// Earliest start (epoch ms)
    #[arg(long)]
    after: Option<i64>,

    /// Delay from now (ms)
    #[arg(long)]
    delay: Option<i64>,

    #[arg(long, default_value = "0")]
    retries: i64,

    /// Wait between retries (ms)
    #[arg(long, default_value_t = DEFAULT_WAIT_MS)]
    retry_wait: i64,

    #[arg(long, default_value = "constant")]
    backoff: RetryBackoff,

    /// Retry deadline (epoch ms)
    #[arg(long)]
    retry_until: Option<i64>,

    /// Repeat count, or "forever"
    #[arg(long, default_value = "0")]
    repeats: String,

    /// Wait between repeats (ms)
    #[arg(long, conflicts_with = "schedule")]
    repeat_wait: Option<i64>,

    /// Cron expression for repeats (repeatable)
    #[arg(long)]
    schedule: Vec<String>,

    /// Cron expression excluded from the schedule (repeatable)
    #[arg(long, requires = "schedule")]
    except: Vec<String>,

    /// Repeat deadline (epoch ms)
    #[arg(long)]
    repeat_until: Option<i64>,

    /// Cancel other repeating jobs of this type first
    #[arg(long)]
    cancel_repeats: bool,
}

impl SaveArgs {
    fn into_spec(self) -> Result<(JobSpec, SaveOptions)> {
        let data: serde_json::Value =
            serde_json::from_str(&self.data).context("Invalid JSON payload")?;
        let priority = parse_priority(&self.priority)?;
        let repeats = match self.repeats.as_str() {
            "forever" => FOREVER,
            n => n
                .parse()
                .with_context(|| format!("Invalid repeat count: {}", n))?,
        };
        let repeat_wait = if self.schedule.is_empty() {
            RepeatWait::Delay(self.repeat_wait.unwrap_or(DEFAULT_WAIT_MS))
        } else {
            RepeatWait::Schedule(CalendarSchedule::new(self.schedule, self.except))
        };

        let mut spec = JobSpec::new(self.job_type, data)
            .priority(priority)
            .depends(self.depends)
            .retry(RetryOptions {
                retries: self.retries,
                until: self.retry_until,
                wait: self.retry_wait,
                backoff: self.backoff,
            })
            .repeat(RepeatOptions {
                repeats,
                until: self.repeat_until,
                wait: repeat_wait,
            });
        spec.id = self.id;
        spec.after = self.after;
        spec.delay = self.delay;

        Ok((
            spec,
            SaveOptions {
                cancel_repeats: self.cancel_repeats,
            },
        ))
    }
}

async fn connect(db: &str) -> Result<QueueGateway> {
    let db_path = shellexpand::tilde(db).into_owned();
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }

    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", db_path, e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    let time_provider = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteJobStore::new(pool, time_provider.clone()));
    let engine = Arc::new(QueueEngine::new(
        store,
        time_provider,
        Arc::new(UuidProvider),
        QueueConfig::default(),
    ));
    Ok(QueueGateway::new(
        Arc::new(JobServer::new(engine)),
        Arc::new(RoleAuthorizer::admin(CLI_IDENTITY)),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let gateway = connect(&cli.db).await?;
    let caller = Caller::new(CLI_IDENTITY);

    match cli.command {
        Commands::Save(args) => {
            let (spec, options) = args.into_spec()?;
            let id = gateway.job_save(&caller, spec, options).await?;
            println!("{}", "✓ Job saved".green().bold());
            let jobs = gateway
                .get_job(&caller, &[id], GetJobOptions::default())
                .await?;
            output::print_jobs(&jobs);
        }

        Commands::Get { ids, history } => {
            let options = if history {
                GetJobOptions::full()
            } else {
                GetJobOptions::default()
            };
            let jobs = gateway.get_job(&caller, &ids, options).await?;
            output::print_jobs(&jobs);
            if history {
                for job in &jobs {
                    output::print_history(job);
                }
            }
        }

        Commands::List {
            status,
            job_type,
            limit,
        } => {
            let query = JobQuery::new()
                .statuses(&status)
                .job_types(job_type.into_iter().map(JobType::new).collect())
                .limit(limit);
            let jobs = gateway.find_jobs(&caller, &query).await?;
            output::print_jobs(&jobs);
        }

        Commands::Pause { ids } => {
            let changed = gateway.job_pause(&caller, &ids).await?;
            output::print_outcome("Paused", &ids, changed);
        }

        Commands::Resume { ids } => {
            let changed = gateway.job_resume(&caller, &ids).await?;
            output::print_outcome("Resumed", &ids, changed);
        }

        Commands::Ready { ids, time, force } => {
            let changed = gateway
                .job_ready(&caller, &ids, ReadyOptions { time, force })
                .await?;
            output::print_outcome("Readied", &ids, changed);
        }

        Commands::Cancel {
            ids,
            antecedents,
            no_dependents,
        } => {
            let options = CancelOptions {
                antecedents,
                dependents: !no_dependents,
            };
            let changed = gateway.job_cancel(&caller, &ids, options).await?;
            output::print_outcome("Cancelled", &ids, changed);
        }

        Commands::Restart {
            ids,
            retries,
            until,
            no_antecedents,
            dependents,
        } => {
            let options = RestartOptions {
                retries,
                until,
                antecedents: !no_antecedents,
                dependents,
            };
            let changed = gateway.job_restart(&caller, &ids, options).await?;
            output::print_outcome("Restarted", &ids, changed);
        }

        Commands::Remove { ids, force } => {
            let changed = gateway
                .job_remove(&caller, &ids, RemoveOptions { force })
                .await?;
            output::print_outcome("Removed", &ids, changed);
        }

        Commands::Rerun {
            id,
            repeats,
            until,
            wait,
        } => {
            let options = RerunOptions {
                repeats,
                until,
                wait,
            };
            match gateway.job_rerun(&caller, &id, options).await? {
                Some(new_id) => println!(
                    "{}",
                    format!("✓ Job {} rerun as {}", id, new_id).green().bold()
                ),
                None => println!(
                    "{}",
                    format!("○ Job {} is not completed; nothing to rerun", id).yellow()
                ),
            }
        }

        Commands::Stats => {
            println!("{}", "Queue Status".cyan().bold());
            println!();
            let counts = gateway.stats(&caller).await?;
            output::print_stats(&counts);
        }
    }

    Ok(())
}
