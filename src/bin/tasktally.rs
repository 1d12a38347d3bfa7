use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use tasktally::{DurationStyle, GroupBy, LeaderboardPeriod, TimeTracker, Window};

#[derive(Parser)]
#[command(name = "tasktally", about = "Track time spent by workers on tasks")]
struct Cli {
    /// Database path (default: ~/.tasktally/tasktally.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Reference instant instead of the current time (RFC 3339)
    #[arg(long, global = true, value_name = "TIME")]
    at: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start working on a task (holds whatever the worker is running)
    Start { worker: String, task: String },
    /// Put a running task on hold
    Hold { worker: String, task: String },
    /// Mark a held task as completed
    Complete { worker: String, task: String },
    /// Show what a worker is running right now
    Current {
        worker: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage workers
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Manage tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Time totals over a window
    Report {
        /// Window: today, 7d, all, 2024-01-05, 2024-01-01..2024-01-31
        #[arg(long, default_value = "today")]
        window: String,
        /// Group by: worker, task, worker-task
        #[arg(long, default_value = "worker")]
        by: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },
    /// Rank workers over a period
    Leaderboard {
        /// daily, weekly or monthly
        #[arg(default_value = "daily")]
        period: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// The worker with the most recorded time
    Top {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Every worker's time on every task
    Overview {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// One worker's time on each assigned task
    Breakdown {
        worker: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show store status
    Status,
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Register or rename a worker
    Add {
        id: String,
        name: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// List workers
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Register or retitle a task
    Add {
        id: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Assign a task to a worker
    Assign { task: String, worker: String },
    /// Override a task's overall status
    Status {
        task: String,
        /// not_started, in_progress, on_hold or completed
        status: String,
    },
    /// List tasks
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => tasktally::Database::open_at(path).await?,
        None => tasktally::Database::open().await?,
    };
    let mut tracker = TimeTracker::new(db).await?;
    let style = tracker.settings().duration_style;
    let now = reference_time(cli.at.as_deref())?;

    match cli.command {
        Commands::Start { worker, task } => {
            let outcome = tracker.start(&worker, &task, now).await?;
            if let Some(held) = outcome.held {
                println!(
                    "Held {} after {}",
                    held.task_id,
                    style.format(held.elapsed_seconds)
                );
            }
            println!("Started {task} for {worker}");
        }
        Commands::Hold { worker, task } => {
            let held = tracker.hold(&worker, &task, now).await?;
            println!(
                "Held {task} for {worker} after {}",
                style.format(held.elapsed_seconds)
            );
        }
        Commands::Complete { worker, task } => {
            tracker.complete(&worker, &task).await?;
            println!("Completed {task} for {worker}");
        }
        Commands::Current { worker, json } => {
            let current = tracker.current_session(&worker, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&current)?);
            } else {
                match current {
                    Some(c) => println!(
                        "{worker} is on {} for {}",
                        c.session.task_id,
                        style.format(c.elapsed_seconds)
                    ),
                    None => println!("{worker} is not running anything."),
                }
            }
        }
        Commands::Worker { action } => handle_worker(&tracker, action).await?,
        Commands::Task { action } => handle_task(&tracker, action).await?,
        Commands::Report {
            window,
            by,
            json,
            csv,
        } => {
            let window = Window::parse(&window, now)?;
            let group_by = GroupBy::parse(&by)
                .ok_or_else(|| anyhow::anyhow!("Unknown grouping '{by}' (worker, task, worker-task)"))?;
            handle_report(&tracker, window, group_by, now, json, csv, style).await?;
        }
        Commands::Leaderboard { period, json } => {
            let period = LeaderboardPeriod::parse(&period)?;
            let board = tracker.leaderboard(period, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
            } else if board.rows.is_empty() {
                println!("No time recorded in {}.", board.window);
            } else {
                println!("{} leaderboard ({})", board.period, board.window);
                for (i, row) in board.rows.iter().enumerate() {
                    println!(
                        "  {:>2}. {:<24} {}",
                        i + 1,
                        label(row.worker_name.as_deref(), row.worker_id.as_deref()),
                        style.format(row.total_seconds)
                    );
                }
            }
        }
        Commands::Top { json } => {
            let top = tracker.top_performer(now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&top)?);
            } else {
                match top {
                    Some(e) => println!(
                        "Top performer: {} ({})",
                        label(e.worker_name.as_deref(), e.worker_id.as_deref()),
                        style.format(e.total_seconds)
                    ),
                    None => println!("No time recorded yet."),
                }
            }
        }
        Commands::Overview { json } => {
            let overview = tracker.task_overview(now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&overview)?);
            } else if overview.is_empty() {
                println!("No time recorded yet.");
            } else {
                for task in &overview {
                    println!("{}", label(task.task_title.as_deref(), Some(task.task_id.as_str())));
                    for w in &task.workers {
                        println!(
                            "  {:<24} today: {:<28} total: {}",
                            label(w.worker_name.as_deref(), Some(w.worker_id.as_str())),
                            style.format(w.today_seconds),
                            style.format(w.total_seconds)
                        );
                    }
                }
            }
        }
        Commands::Breakdown { worker, json } => {
            let rows = tracker.worker_breakdown(&worker, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No tasks for {worker}.");
            } else {
                for row in &rows {
                    println!(
                        "[{}] {} ({}) today: {} | total: {}",
                        row.status,
                        row.title,
                        row.task_id,
                        style.format(row.today_seconds),
                        style.format(row.total_seconds)
                    );
                }
            }
        }
        Commands::Config { action } => handle_config(&mut tracker, action).await?,
        Commands::Status => print_status(&tracker).await?,
    }

    Ok(())
}

fn reference_time(at: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .map_err(|e| anyhow::anyhow!("Invalid --at time '{s}': {e}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn label(name: Option<&str>, id: Option<&str>) -> String {
    match (name, id) {
        (Some(name), Some(id)) => format!("{name} ({id})"),
        (Some(name), None) => name.to_string(),
        (None, Some(id)) => id.to_string(),
        (None, None) => "-".to_string(),
    }
}

async fn handle_worker(tracker: &TimeTracker, action: WorkerAction) -> anyhow::Result<()> {
    match action {
        WorkerAction::Add { id, name, email } => {
            tracker.add_worker(&id, &name, email.as_deref()).await?;
            println!("Added worker {id}");
        }
        WorkerAction::List => {
            let workers = tracker.list_workers().await?;
            if workers.is_empty() {
                println!("No workers registered.");
            }
            for w in workers {
                match w.email {
                    Some(email) => println!("{}  {} <{email}>", w.worker_id, w.name),
                    None => println!("{}  {}", w.worker_id, w.name),
                }
            }
        }
    }
    Ok(())
}

async fn handle_task(tracker: &TimeTracker, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Add {
            id,
            title,
            description,
        } => {
            tracker.add_task(&id, &title, description.as_deref()).await?;
            println!("Added task {id}");
        }
        TaskAction::Assign { task, worker } => {
            tracker.assign_task(&task, &worker).await?;
            println!("Assigned {task} to {worker}");
        }
        TaskAction::Status { task, status } => {
            let status = tracker.set_task_status(&task, &status).await?;
            println!("Task {task} is now {status}");
        }
        TaskAction::List => {
            let tasks = tracker.list_tasks().await?;
            if tasks.is_empty() {
                println!("No tasks registered.");
            }
            for t in tasks {
                println!("[{}] {}  {}", t.status, t.task_id, t.title);
            }
        }
    }
    Ok(())
}

async fn handle_report(
    tracker: &TimeTracker,
    window: Window,
    group_by: GroupBy,
    now: DateTime<Utc>,
    json: bool,
    csv: bool,
    style: DurationStyle,
) -> anyhow::Result<()> {
    let agg = tracker.aggregate(window, group_by, now).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agg)?);
        return Ok(());
    }
    if csv {
        print!("{}", agg.to_csv());
        return Ok(());
    }

    if agg.entries.is_empty() {
        println!("No time recorded in {}.", agg.window);
    } else {
        println!("Time in {}", agg.window);
        for e in &agg.entries {
            let who = match (&e.worker_id, &e.task_id) {
                (Some(_), Some(_)) => format!(
                    "{} / {}",
                    label(e.worker_name.as_deref(), e.worker_id.as_deref()),
                    label(e.task_title.as_deref(), e.task_id.as_deref())
                ),
                (Some(_), None) => label(e.worker_name.as_deref(), e.worker_id.as_deref()),
                _ => label(e.task_title.as_deref(), e.task_id.as_deref()),
            };
            println!(
                "  {who:<40} today: {:<28} window: {}",
                style.format(e.today_seconds),
                style.format(e.total_seconds)
            );
        }
        println!("\nTotal: {}", style.format(agg.total_seconds()));
    }
    for f in &agg.flagged {
        eprintln!(
            "warning: skipped session {} ({}/{}): {}",
            f.session_id.map_or("-".to_string(), |id| id.to_string()),
            f.worker_id,
            f.task_id,
            f.reason
        );
    }
    Ok(())
}

async fn handle_config(tracker: &mut TimeTracker, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match tracker.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            tracker.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = tracker.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn print_status(tracker: &TimeTracker) -> anyhow::Result<()> {
    let workers = tracker.list_workers().await?.len();
    let tasks = tracker.list_tasks().await?.len();
    let counts = tracker.status_counts().await?;

    println!("Tracker Status");
    println!("  Workers:  {workers}");
    println!("  Tasks:    {tasks}");
    if counts.is_empty() {
        println!("  Sessions: none");
    } else {
        println!("  Sessions:");
        for (status, n) in counts {
            println!("    {:<12} {n}", status.label());
        }
    }
    let settings = tracker.settings();
    println!(
        "  Leaderboards: weekly {}d, monthly {}d",
        settings.weekly_days, settings.monthly_days
    );
    println!("  Duration style: {}", settings.duration_style.as_str());
    Ok(())
}
