//! Course Flux CLI - Command-line interface for Course Flux
//!
//! Commands:
//! - build: Final design matrix (X, y, manifest)
//! - baseline: Hand-crafted design matrix from windowed counts
//! - weights: Compute or load step-difficulty weights
//! - label: Completion labels only
//! - split: User-disjoint train/test split of the raw logs
//! - doctor: Diagnose configuration and cache health
//! - schema: Describe the expected input CSVs

use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use course_flux::config::PipelineConfig;
use course_flux::encoder::{DesignMatrixEncoder, MatrixKind};
use course_flux::error::CacheError;
use course_flux::interaction::merge_interactions;
use course_flux::schema::{Action, EventRecord, LogAdapter, StepMetadata, SubmissionRecord};
use course_flux::split::split_by_users;
use course_flux::synthesis::TimeSeriesCache;
use course_flux::{CourseFluxProcessor, PRODUCER_NAME, VERSION};

const EVENTS_FILE: &str = "event_data_train.csv";
const SUBMISSIONS_FILE: &str = "submissions_data_train.csv";
const STEPS_FILE: &str = "step_structure.csv";

/// Course Flux - Feature engineering for course completion prediction
#[derive(Parser)]
#[command(name = "course-flux")]
#[command(version = VERSION)]
#[command(about = "Turn course platform logs into a design matrix", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON); defaults apply when absent
    #[arg(long, global = true, default_value = "course-flux.json")]
    config: PathBuf,

    /// Log level, overrides the configuration (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LogInputs {
    /// Events CSV (default: <data_dir>/event_data_train.csv)
    #[arg(long)]
    events: Option<PathBuf>,

    /// Submissions CSV (default: <data_dir>/submissions_data_train.csv)
    #[arg(long)]
    submissions: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the final design matrix
    Build {
        #[command(flatten)]
        inputs: LogInputs,

        /// Step metadata CSV (default: <data_dir>/step_structure.csv)
        #[arg(long)]
        steps: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build the hand-crafted baseline design matrix
    Baseline {
        #[command(flatten)]
        inputs: LogInputs,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compute or load step-difficulty weights
    Weights {
        #[command(flatten)]
        inputs: LogInputs,

        /// Recompute and overwrite the cache
        #[arg(long)]
        refresh: bool,

        /// Also write the weights as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write completion labels only
    Label {
        #[command(flatten)]
        inputs: LogInputs,

        /// Output CSV (user_id,is_gone)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Split the raw logs into user-disjoint train/test sets
    Split {
        #[command(flatten)]
        inputs: LogInputs,

        /// Fraction of users held out
        #[arg(long, default_value = "0.3")]
        test_size: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Diagnose configuration and cache health
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe the expected input CSVs
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CourseCliError> {
    let config = PipelineConfig::load(&cli.config)?;
    let level = cli.log_level.unwrap_or_else(|| config.log.level.clone());
    init_logging(&level, cli.log_json || config.log.json);

    match cli.command {
        Commands::Build {
            inputs,
            steps,
            output,
        } => cmd_build(config, &inputs, steps.as_deref(), &output),
        Commands::Baseline { inputs, output } => cmd_baseline(config, &inputs, &output),
        Commands::Weights {
            inputs,
            refresh,
            output,
        } => cmd_weights(config, &inputs, refresh, output.as_deref()),
        Commands::Label { inputs, output } => cmd_label(config, &inputs, &output),
        Commands::Split {
            inputs,
            test_size,
            seed,
            output,
        } => cmd_split(&config, &inputs, test_size, seed, &output),
        Commands::Doctor { json } => cmd_doctor(&cli.config, &config, json),
        Commands::Schema { json } => cmd_schema(json),
    }
}

/// Logs go to stderr; stdout is reserved for command output
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

fn read_logs(
    config: &PipelineConfig,
    inputs: &LogInputs,
) -> Result<(Vec<EventRecord>, Vec<SubmissionRecord>), CourseCliError> {
    let events_path = inputs
        .events
        .clone()
        .unwrap_or_else(|| config.data_dir.join(EVENTS_FILE));
    let submissions_path = inputs
        .submissions
        .clone()
        .unwrap_or_else(|| config.data_dir.join(SUBMISSIONS_FILE));

    let events = LogAdapter::read_events_path(&events_path)?;
    let submissions = LogAdapter::read_submissions_path(&submissions_path)?;
    if events.is_empty() && submissions.is_empty() {
        return Err(CourseCliError::NoRecords);
    }
    info!(
        events = events.len(),
        submissions = submissions.len(),
        "read raw logs"
    );
    Ok((events, submissions))
}

fn cmd_build(
    config: PipelineConfig,
    inputs: &LogInputs,
    steps: Option<&Path>,
    output: &Path,
) -> Result<(), CourseCliError> {
    let (events, submissions) = read_logs(&config, inputs)?;
    let steps_path = steps
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.data_dir.join(STEPS_FILE));
    // Synthesis still runs on the interaction log alone without step metadata
    let step_metadata = if steps_path.exists() {
        LogAdapter::read_step_metadata_path(&steps_path)?
    } else {
        StepMetadata::default()
    };

    let processor = CourseFluxProcessor::new(config);
    let matrix = processor.build_design_matrix(&events, &submissions, &step_metadata)?;
    let paths = DesignMatrixEncoder::new().write(&matrix, MatrixKind::Final, processor.config(), output)?;
    println!("{}", paths.manifest.display());
    Ok(())
}

fn cmd_baseline(
    config: PipelineConfig,
    inputs: &LogInputs,
    output: &Path,
) -> Result<(), CourseCliError> {
    let (events, submissions) = read_logs(&config, inputs)?;
    let processor = CourseFluxProcessor::new(config);
    let matrix = processor.baseline(&events, &submissions)?;
    let paths =
        DesignMatrixEncoder::new().write(&matrix, MatrixKind::Baseline, processor.config(), output)?;
    println!("{}", paths.manifest.display());
    Ok(())
}

fn cmd_weights(
    config: PipelineConfig,
    inputs: &LogInputs,
    refresh: bool,
    output: Option<&Path>,
) -> Result<(), CourseCliError> {
    let (events, submissions) = read_logs(&config, inputs)?;
    let processor = CourseFluxProcessor::new(config);
    let weights = processor.step_weights(&merge_interactions(&events, &submissions), refresh)?;

    match output {
        Some(path) => weights.write_csv(BufWriter::new(File::create(path)?))?,
        None => println!(
            "{} steps weighted ({})",
            weights.len(),
            processor.weight_cache().path().display()
        ),
    }
    Ok(())
}

fn cmd_label(config: PipelineConfig, inputs: &LogInputs, output: &Path) -> Result<(), CourseCliError> {
    let (events, submissions) = read_logs(&config, inputs)?;
    let labels = CourseFluxProcessor::new(config).labels(&events, &submissions)?;
    labels.write_csv(BufWriter::new(File::create(output)?))?;
    println!("{} users, {} completed", labels.len(), labels.positives());
    Ok(())
}

fn cmd_split(
    config: &PipelineConfig,
    inputs: &LogInputs,
    test_size: f64,
    seed: u64,
    output: &Path,
) -> Result<(), CourseCliError> {
    let (events, submissions) = read_logs(config, inputs)?;
    let split = split_by_users(&events, &submissions, test_size, seed)?;

    fs::create_dir_all(output)?;
    let create = |name: &str| File::create(output.join(name)).map(BufWriter::new);
    LogAdapter::write_events(&split.train_events, create("events_train.csv")?)?;
    LogAdapter::write_events(&split.test_events, create("events_test.csv")?)?;
    LogAdapter::write_submissions(&split.train_submissions, create("submissions_train.csv")?)?;
    LogAdapter::write_submissions(&split.test_submissions, create("submissions_test.csv")?)?;

    println!(
        "{} train users, {} test users",
        split.train_users.len(),
        split.test_users.len()
    );
    Ok(())
}

fn cmd_doctor(config_path: &Path, config: &PipelineConfig, json: bool) -> Result<(), CourseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Course Flux version {}", VERSION),
    });

    // Configuration (already loaded and validated)
    checks.push(DoctorCheck {
        name: "config".to_string(),
        status: CheckStatus::Ok,
        message: if config_path.exists() {
            format!("Loaded {}", config_path.display())
        } else {
            format!("{} not found, using defaults", config_path.display())
        },
    });

    // Raw data directory
    for (name, file) in [("events", EVENTS_FILE), ("submissions", SUBMISSIONS_FILE), ("steps", STEPS_FILE)] {
        let path = config.data_dir.join(file);
        checks.push(if path.exists() {
            DoctorCheck {
                name: name.to_string(),
                status: CheckStatus::Ok,
                message: format!("Found {}", path.display()),
            }
        } else {
            DoctorCheck {
                name: name.to_string(),
                status: CheckStatus::Warning,
                message: format!("{} does not exist", path.display()),
            }
        });
    }

    // Step weight cache. Without the logs the key cannot be recomputed, so
    // any readable archive counts as healthy.
    let processor = CourseFluxProcessor::new(config.clone());
    let weight_path = processor.weight_cache().path().display().to_string();
    checks.push(match processor.weight_cache().load("") {
        Ok(_) | Err(CacheError::Stale { .. }) => DoctorCheck {
            name: "step_weight_cache".to_string(),
            status: CheckStatus::Ok,
            message: format!("Step weight cache readable ({})", weight_path),
        },
        Err(CacheError::Missing(_)) => DoctorCheck {
            name: "step_weight_cache".to_string(),
            status: CheckStatus::Warning,
            message: format!("No step weight cache at {}; first build will compute it", weight_path),
        },
        Err(e) => DoctorCheck {
            name: "step_weight_cache".to_string(),
            status: CheckStatus::Error,
            message: format!("Step weight cache unusable: {}", e),
        },
    });

    checks.push(ts_cache_check(processor.ts_cache(), config.synthesis.use_ts_cache));

    // Log output destination
    let stderr_check = if atty::is(atty::Stream::Stderr) {
        DoctorCheck {
            name: "stderr".to_string(),
            status: CheckStatus::Ok,
            message: "stderr is a TTY (human-readable logs)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stderr".to_string(),
            status: CheckStatus::Ok,
            message: "stderr is redirected (consider --log-json)".to_string(),
        }
    };
    checks.push(stderr_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Course Flux Doctor Report");
        println!("=========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CourseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn ts_cache_check(cache: &TimeSeriesCache, enabled: bool) -> DoctorCheck {
    let name = "ts_feature_cache".to_string();
    if !enabled {
        return DoctorCheck {
            name,
            status: CheckStatus::Ok,
            message: "Disabled; time-series features are extracted natively".to_string(),
        };
    }
    if !cache.exists() {
        return DoctorCheck {
            name,
            status: CheckStatus::Warning,
            message: format!(
                "No cache in {}; falling back to native extraction",
                cache.dir().display()
            ),
        };
    }
    match cache.load() {
        Ok(table) => DoctorCheck {
            name,
            status: CheckStatus::Ok,
            message: format!("{} users, {} features", table.n_rows(), table.n_cols()),
        },
        Err(e) => DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: format!("Time-series cache unusable: {}", e),
        },
    }
}

fn cmd_schema(json: bool) -> Result<(), CourseCliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&input_schema())?);
        return Ok(());
    }

    println!("Input CSVs (columns located by header name)");
    println!();
    println!("events: user_id, step_id, timestamp, action");
    println!("  action: discovered | viewed | started_attempt | passed");
    println!();
    println!("submissions: user_id, step_id, timestamp, submission_status");
    println!("  submission_status: wrong | correct");
    println!();
    println!("steps: step_id, then any attribute columns (wide layout)");
    println!();
    println!("timestamp is unix seconds (UTC).");
    println!(
        "Interaction order: {}",
        Action::ALL.map(|a| a.as_str()).join(" < ")
    );
    Ok(())
}

fn input_schema() -> serde_json::Value {
    serde_json::json!({
        "events": {
            "columns": ["user_id", "step_id", "timestamp", "action"],
            "action": ["discovered", "viewed", "started_attempt", "passed"]
        },
        "submissions": {
            "columns": ["user_id", "step_id", "timestamp", "submission_status"],
            "submission_status": ["wrong", "correct"]
        },
        "steps": {
            "key": "step_id",
            "layout": "wide"
        },
        "timestamp": "unix seconds, UTC",
        "interaction_order": Action::ALL.map(|a| a.as_str())
    })
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug)]
enum CourseCliError {
    Io(io::Error),
    Compute(course_flux::ComputeError),
    Json(serde_json::Error),
    NoRecords,
    DoctorFailed,
}

impl From<io::Error> for CourseCliError {
    fn from(e: io::Error) -> Self {
        CourseCliError::Io(e)
    }
}

impl From<course_flux::ComputeError> for CourseCliError {
    fn from(e: course_flux::ComputeError) -> Self {
        CourseCliError::Compute(e)
    }
}

impl From<serde_json::Error> for CourseCliError {
    fn from(e: serde_json::Error) -> Self {
        CourseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CourseCliError> for CliError {
    fn from(e: CourseCliError) -> Self {
        use course_flux::ComputeError;

        match e {
            CourseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CourseCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::ConfigError(_) => ("CONFIG_ERROR", "Check the configuration file"),
                    ComputeError::ParseError(_)
                    | ComputeError::MissingColumn(_)
                    | ComputeError::UnknownAction(_)
                    | ComputeError::CsvError(_) => {
                        ("PARSE_ERROR", "Run 'course-flux schema' for the expected columns")
                    }
                    ComputeError::TargetActionAbsent(_) => {
                        ("NO_TARGET_ACTION", "Choose a target_action present in the logs")
                    }
                    ComputeError::Cache(_) => {
                        ("CACHE_ERROR", "Run 'course-flux weights --refresh' to rebuild the cache")
                    }
                    _ => ("COMPUTE_ERROR", "Run 'course-flux doctor' for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CourseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CourseCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No events or submissions found in input".to_string(),
                hint: Some("Ensure the input files are not empty".to_string()),
            },
            CourseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report above".to_string()),
            },
        }
    }
}
