use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use quiz_core::model::Category;
use quiz_core::time::Clock;
use services::{
    Connectivity, ConnectivityMonitor, ConnectivityProbe, DrainStatus, HttpProbe, HttpRemote,
    ProgressService, ReconcileEngine, RemoteConfig,
};
use storage::sqlite::SqliteCache;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArg { name: &'static str },
    UnknownArg(String),
    InvalidNumber { name: &'static str, raw: String },
    InvalidCategory { raw: String },
    InvalidAnswer { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArg { name } => write!(f, "missing argument: {name}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { name, raw } => write!(f, "invalid {name}: {raw}"),
            ArgsError::InvalidCategory { raw } => write!(f, "invalid category: {raw}"),
            ArgsError::InvalidAnswer { raw } => {
                write!(f, "expected 'correct' or 'wrong', got: {raw}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- status");
    eprintln!("  cargo run -p app -- save <category> <stage> <score>");
    eprintln!("  cargo run -p app -- complete <category> <stage> <score>");
    eprintln!("  cargo run -p app -- unlock <level>");
    eprintln!("  cargo run -p app -- daily <correct|wrong>");
    eprintln!("  cargo run -p app -- freestyle <correct|wrong>");
    eprintln!("  cargo run -p app -- reset");
    eprintln!("  cargo run -p app -- sync");
    eprintln!("  cargo run -p app -- run");
    eprintln!();
    eprintln!("Categories: roadmap, time-trial");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>    local cache (default sqlite:progress.sqlite3)");
    eprintln!("  --user <id>          user identifier (required unless QUIZ_USER_ID is set)");
    eprintln!("  --remote <base_url>  progress store (default http://127.0.0.1:8787)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_USER_ID, QUIZ_REMOTE_URL, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Save {
        category: Category,
        stage: u8,
        score: u32,
    },
    Complete {
        category: Category,
        stage: u8,
        score: u32,
    },
    Unlock {
        level: u32,
    },
    Daily {
        correct: bool,
    },
    Freestyle {
        correct: bool,
    },
    Reset,
    Sync,
    Run,
}

struct Args {
    db_url: String,
    user: String,
    remote_url: String,
    command: Command,
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidNumber {
        name,
        raw: raw.to_string(),
    })
}

fn parse_answer(raw: &str) -> Result<bool, ArgsError> {
    match raw {
        "correct" => Ok(true),
        "wrong" => Ok(false),
        _ => Err(ArgsError::InvalidAnswer {
            raw: raw.to_string(),
        }),
    }
}

impl Args {
    fn parse(mut argv: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://progress.sqlite3".into(), normalize_sqlite_url);
        let mut user = std::env::var("QUIZ_USER_ID").unwrap_or_default();
        let mut remote_url = std::env::var("QUIZ_REMOTE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8787".into());

        let name = argv.next().ok_or(ArgsError::MissingArg { name: "command" })?;
        let mut positionals: Vec<String> = Vec::new();

        while let Some(arg) = argv.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut argv, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => user = require_value(&mut argv, "--user")?,
                "--remote" => remote_url = require_value(&mut argv, "--remote")?,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other if other.starts_with("--") => {
                    return Err(ArgsError::UnknownArg(arg));
                }
                _ => positionals.push(arg),
            }
        }

        let mut positionals = positionals.into_iter();
        let mut next_positional = |name: &'static str| -> Result<String, ArgsError> {
            positionals.next().ok_or(ArgsError::MissingArg { name })
        };

        let command = match name.as_str() {
            "status" => Command::Status,
            "save" | "complete" => {
                let raw = next_positional("category")?;
                let category: Category = raw
                    .parse()
                    .map_err(|_| ArgsError::InvalidCategory { raw })?;
                let stage = parse_number("stage", &next_positional("stage")?)?;
                let score = parse_number("score", &next_positional("score")?)?;
                if name == "save" {
                    Command::Save {
                        category,
                        stage,
                        score,
                    }
                } else {
                    Command::Complete {
                        category,
                        stage,
                        score,
                    }
                }
            }
            "unlock" => Command::Unlock {
                level: parse_number("level", &next_positional("level")?)?,
            },
            "daily" => Command::Daily {
                correct: parse_answer(&next_positional("answer")?)?,
            },
            "freestyle" => Command::Freestyle {
                correct: parse_answer(&next_positional("answer")?)?,
            },
            "reset" => Command::Reset,
            "sync" => Command::Sync,
            "run" => Command::Run,
            other => return Err(ArgsError::UnknownArg(other.to_string())),
        };

        Ok(Self {
            db_url,
            user,
            remote_url,
            command,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

struct Session {
    service: Arc<ProgressService>,
    // keeps the connectivity channel alive for one-shot commands
    _conn_tx: Option<watch::Sender<Connectivity>>,
    monitor: Option<ConnectivityMonitor>,
}

/// Builds the full stack for a one-shot command: probe connectivity once and
/// hand the service a fixed state.
async fn open_session(args: &Args) -> Result<Session, Box<dyn std::error::Error>> {
    prepare_sqlite_file(&args.db_url)?;
    let cache = SqliteCache::open(&args.db_url).await?;
    let remote = Arc::new(HttpRemote::new(RemoteConfig {
        base_url: args.remote_url.clone(),
    }));

    let probe = HttpProbe::new(args.remote_url.clone());
    let state = probe.check().await;
    tracing::debug!(?state, "initial connectivity");
    let (conn_tx, conn_rx) = watch::channel(state);

    let service = ProgressService::sign_in(
        &args.user,
        Arc::new(cache),
        remote,
        conn_rx,
        Clock::default_clock(),
    )
    .await?;

    if let Some(fault) = service.startup_fault() {
        eprintln!("warning: local cache was unreadable ({fault:?}); starting from zero");
    }

    Ok(Session {
        service,
        _conn_tx: Some(conn_tx),
        monitor: None,
    })
}

/// Builds the long-running stack: background reachability monitor plus
/// reconciliation engine.
async fn open_monitored_session(args: &Args) -> Result<Session, Box<dyn std::error::Error>> {
    prepare_sqlite_file(&args.db_url)?;
    let cache = SqliteCache::open(&args.db_url).await?;
    let remote = Arc::new(HttpRemote::new(RemoteConfig {
        base_url: args.remote_url.clone(),
    }));

    let probe = Arc::new(HttpProbe::new(args.remote_url.clone()));
    let monitor = ConnectivityMonitor::spawn(probe, Duration::from_secs(10));

    let service = ProgressService::sign_in(
        &args.user,
        Arc::new(cache),
        remote,
        monitor.subscribe(),
        Clock::default_clock(),
    )
    .await?;

    Ok(Session {
        service,
        _conn_tx: None,
        monitor: Some(monitor),
    })
}

fn print_status_line(label: &str, breakdown: quiz_core::model::CategoryBreakdown) {
    println!(
        "{label}: {}/{} ({:.1}%)",
        breakdown.score(),
        breakdown.max(),
        breakdown.percent()
    );
}

async fn print_status(service: &Arc<ProgressService>) {
    let snapshot = service.fetch_aggregate().await;
    println!("user: {}", service.user());
    println!("unlocked stages: {}", snapshot.unlocked_stages());
    print_status_line("roadmap", snapshot.breakdown(Category::Roadmap));
    print_status_line("time trial", snapshot.breakdown(Category::TimeTrial));
    print_status_line("overall", snapshot.overall_breakdown());
    println!(
        "daily score: {}   freestyle score: {}",
        snapshot.daily_score(),
        snapshot.freestyle_score()
    );
    println!("pending mutations: {}", service.pending_count().await);
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() || matches!(argv[0].as_str(), "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let args = Args::parse(argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match args.command.clone() {
        Command::Status => {
            let session = open_session(&args).await?;
            print_status(&session.service).await;
        }
        Command::Save {
            category,
            stage,
            score,
        } => {
            let session = open_session(&args).await?;
            session.service.save_score(category, stage, score).await?;
            println!(
                "saved {category} stage {stage} = {score} (pending: {})",
                session.service.pending_count().await
            );
        }
        Command::Complete {
            category,
            stage,
            score,
        } => {
            let session = open_session(&args).await?;
            session
                .service
                .record_stage_completion(category, stage, score)
                .await?;
            let snapshot = session.service.snapshot().await;
            println!(
                "completed {category} stage {stage} = {score} (unlocked: {})",
                snapshot.unlocked_stages()
            );
        }
        Command::Unlock { level } => {
            let session = open_session(&args).await?;
            session.service.record_unlock(level).await?;
            println!("unlocked stages: {level}");
        }
        Command::Daily { correct } => {
            let session = open_session(&args).await?;
            let outcome = session.service.record_daily_answer(correct).await?;
            println!("{outcome:?}");
        }
        Command::Freestyle { correct } => {
            let session = open_session(&args).await?;
            let score = session.service.record_freestyle_answer(correct).await?;
            println!("freestyle score: {score}");
        }
        Command::Reset => {
            let session = open_session(&args).await?;
            session.service.reset_progress().await?;
            println!("progress reset");
        }
        Command::Sync => {
            let session = open_session(&args).await?;
            let status = session.service.drain_pending().await;
            if status == DrainStatus::Drained {
                session.service.refresh_from_remote().await;
            }
            println!(
                "drain: {status:?} (pending: {})",
                session.service.pending_count().await
            );
        }
        Command::Run => {
            let session = open_monitored_session(&args).await?;
            let _engine = ReconcileEngine::spawn(Arc::clone(&session.service));
            let mut progress = session.service.observe_progress();
            let mut faults = session.service.observe_faults();

            println!("session running for {}; ctrl-c to stop", session.service.user());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = progress.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = progress.borrow_and_update().clone();
                        let pending = session.service.pending_count().await;
                        tracing::info!(
                            unlocked = snapshot.unlocked_stages(),
                            overall = snapshot.overall_breakdown().score(),
                            pending,
                            "progress updated"
                        );
                    }
                    fault = faults.recv() => {
                        match fault {
                            Ok(fault) => tracing::warn!(?fault, "sync fault"),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            drop(session.monitor);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
