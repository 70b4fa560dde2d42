// Terminal rendering

use colored::{ColoredString, Colorize};
use jobq_core::domain::{Job, JobStatus, LogLevel, FOREVER};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct JobLine {
    id: String,
    #[tabled(rename = "type")]
    job_type: String,
    status: String,
    priority: i32,
    after: String,
    retries: String,
    repeats: String,
    progress: String,
}

impl From<&Job> for JobLine {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.to_string(),
            status: job.status.as_str().to_string(),
            priority: job.priority,
            after: timestamp(job.after),
            retries: format!("{}/{}", job.retried, job.retries),
            repeats: if job.repeats == FOREVER {
                format!("{}/forever", job.repeated)
            } else {
                format!("{}/{}", job.repeated, job.repeats)
            },
            progress: format!("{:.0}%", job.progress.percent),
        }
    }
}

#[derive(Tabled)]
struct StatusCount {
    status: String,
    count: i64,
}

pub fn status_label(status: JobStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        JobStatus::Ready => label.cyan(),
        JobStatus::Waiting => label.yellow(),
        JobStatus::Running => label.blue().bold(),
        JobStatus::Paused => label.magenta(),
        JobStatus::Completed => label.green(),
        JobStatus::Cancelled => label.dimmed(),
        JobStatus::Failed => label.red().bold(),
    }
}

fn timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("{}", "No jobs found".yellow());
        return;
    }
    let lines: Vec<JobLine> = jobs.iter().map(JobLine::from).collect();
    println!("{}", Table::new(lines));
}

pub fn print_history(job: &Job) {
    println!();
    println!(
        "{} {}",
        format!("History for job {}:", job.id).cyan().bold(),
        status_label(job.status)
    );
    for entry in &job.log {
        let level = match entry.level {
            LogLevel::Info => entry.level.as_str().normal(),
            LogLevel::Success => entry.level.as_str().green(),
            LogLevel::Warning => entry.level.as_str().yellow(),
            LogLevel::Danger => entry.level.as_str().red(),
        };
        println!(
            "  {} [{}] {} {}",
            timestamp(entry.time),
            level,
            entry.message,
            entry.run_id.as_deref().unwrap_or("")
        );
    }
    for failure in &job.failures {
        println!(
            "  {} [{}] {}",
            timestamp(failure.time),
            "failure".red(),
            failure.error
        );
    }
}

pub fn print_stats(counts: &[(JobStatus, i64)]) {
    let lines: Vec<StatusCount> = counts
        .iter()
        .map(|(status, count)| StatusCount {
            status: status.as_str().to_string(),
            count: *count,
        })
        .collect();
    let total: i64 = counts.iter().map(|(_, c)| c).sum();
    println!("{}", Table::new(lines));
    println!("  {} {}", "Total Jobs:".bold(), total);
}

/// Outcome line for the multi-id operations
pub fn print_outcome(action: &str, ids: &[String], changed: bool) {
    if changed {
        println!("{}", format!("✓ {}: {}", action, ids.join(", ")).green().bold());
    } else {
        println!(
            "{}",
            format!("○ {}: no job in an eligible state", action).yellow()
        );
    }
}
