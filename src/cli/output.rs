// Output formatting and display for CLI

use crate::config::{LogSection, PoolConfig, WorkerSpec};
use crate::process::{ShutdownReport, WorkerHandle, WorkerState};
use chrono::{DateTime, Local};
use colored::*;
use std::path::Path;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of the pool's slots
pub fn print_pool_table(spec: &WorkerSpec, workers: &[WorkerHandle]) {
    #[derive(Tabled)]
    struct SlotRow {
        #[tabled(rename = "Slot")]
        slot: String,
        #[tabled(rename = "Worker")]
        name: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Generation")]
        generation: String,
        #[tabled(rename = "Started")]
        started: String,
    }

    if workers.is_empty() {
        println!("{}", "No workers are currently running".yellow());
        return;
    }

    let rows: Vec<SlotRow> = workers
        .iter()
        .map(|w| SlotRow {
            slot: w.slot.to_string(),
            name: truncate(&spec.name, 20),
            pid: w.pid.to_string(),
            state: format_state_colored(w.state),
            generation: w.generation.to_string(),
            started: {
                let datetime: DateTime<Local> = w.started_at.into();
                datetime.format("%H:%M:%S").to_string()
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} worker(s)", workers.len())
            .dimmed()
            .italic()
    );
}

/// Print the resolved configuration for `poolkeeper check`
pub fn print_config(path: &Path, pool: &PoolConfig, spec: &WorkerSpec, log: &LogSection) {
    println!("\n{}", "Resolved Configuration".bold().underline());
    println!();
    println!("  {:<18} {}", "File:".bold(), path.display());
    println!("  {:<18} {}", "Workers:".bold(), pool.worker_count);
    println!(
        "  {:<18} {}",
        "Check interval:".bold(),
        format_duration(&pool.check_interval)
    );
    println!(
        "  {:<18} {:.1}% cpu, {:.1}% memory",
        "Warn at:".bold(),
        pool.cpu_warn_threshold,
        pool.mem_warn_threshold
    );
    println!(
        "  {:<18} {}",
        "Terminate grace:".bold(),
        format_duration(&pool.terminate_grace)
    );
    println!(
        "  {:<18} {}",
        "Settle delay:".bold(),
        format_duration(&pool.settle_delay)
    );

    println!();
    println!("  {:<18} {}", "Worker:".bold(), spec.name.cyan());

    match spec.resolve_command() {
        Some(program) => println!("  {:<18} {}", "Command:".bold(), program.display()),
        None => println!(
            "  {:<18} {} {}",
            "Command:".bold(),
            spec.command.display(),
            "(not found)".red()
        ),
    }

    if !spec.args.is_empty() {
        println!("  {:<18} {}", "Arguments:".bold(), spec.args.join(" "));
    }

    if let Some(ref cwd) = spec.cwd {
        println!("  {:<18} {}", "Directory:".bold(), cwd.display());
    }

    if !spec.env.is_empty() {
        let mut keys: Vec<&str> = spec.env.keys().map(String::as_str).collect();
        keys.sort_unstable();
        println!("  {:<18} {}", "Environment:".bold(), keys.join(", "));
    }

    println!("  {:<18} {}", "Payload:".bold(), spec.payload);

    println!();
    println!(
        "  {:<18} {} ({})",
        "Logging:".bold(),
        log.level,
        log.format
    );
    println!();
}

/// Print the outcome of a pool shutdown
pub fn print_shutdown_report(report: &ShutdownReport) {
    print_success(&format!(
        "Pool stopped: {} terminated, {} killed, {} already exited",
        report.terminated, report.killed, report.already_exited
    ));
}

/// Format a worker state with color coding
fn format_state_colored(state: WorkerState) -> String {
    match state {
        WorkerState::Running => state.to_string().green().to_string(),
        WorkerState::Starting => state.to_string().yellow().to_string(),
        WorkerState::Terminating => state.to_string().yellow().to_string(),
        WorkerState::Terminated => state.to_string().bright_black().to_string(),
        WorkerState::Exited => state.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
