//! Kinesense CLI - Command-line interface for the behavior engine
//!
//! Commands:
//! - analyze: Analyze one behavior payload (always prints one JSON result)
//! - batch: Analyze a list of tagged payloads
//! - status: Report classifier availability per behavior
//! - state: Inspect or reset the persisted posture state

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use kinesense::config::AppConfig;
use kinesense::logging::{init_default_logging, init_logging};
use kinesense::posture::PostureRecord;
use kinesense::{
    BehaviorAnalyzer, DetectError, DetectionResult, FilePostureStore, PostureStore,
    PrecomputedEstimator, StoreError, KINESENSE_VERSION,
};
use tracing::error;

/// Kinesense - Behavior-signal fusion and posture state engine
#[derive(Parser)]
#[command(name = "kinesense")]
#[command(version = KINESENSE_VERSION)]
#[command(about = "Detect behaviors from webcam frame batches", long_about = None)]
struct Cli {
    /// Config file (JSON: state_file, logging, detectors)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Posture state file (overrides the config)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one behavior payload
    Analyze {
        /// Behavior tag (eye_gaze, tapping_hands, tapping_feet, sit_stand, rapid_talking)
        #[arg(short, long)]
        behavior: String,

        /// Payload JSON file (use - for stdin)
        #[arg(short, long)]
        data: PathBuf,

        /// Precomputed landmarks JSON file
        #[arg(long)]
        landmarks: Option<PathBuf>,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Analyze a list of tagged payloads
    Batch {
        /// Batch JSON file (use - for stdin)
        #[arg(short, long)]
        data: PathBuf,

        /// Precomputed landmarks JSON file
        #[arg(long)]
        landmarks: Option<PathBuf>,
    },

    /// Report classifier availability per behavior
    Status,

    /// Inspect or reset the persisted posture state
    State {
        /// Reset to the unknown posture
        #[arg(long)]
        reset: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), KinesenseCliError> {
    let app = match cli.config.as_deref() {
        Some(path) => {
            let app = AppConfig::from_file(path).map_err(KinesenseCliError::Config);
            match &app {
                Ok(app) => init_logging(&app.logging),
                Err(_) => init_default_logging(),
            }
            app
        }
        None => {
            let app = AppConfig::default();
            init_logging(&app.logging);
            Ok(app)
        }
    };

    match cli.command {
        Commands::Analyze {
            behavior,
            data,
            landmarks,
            pretty,
        } => {
            // A result is printed even when setup fails
            let result = app.and_then(|app| {
                let analyzer = build_analyzer(app, cli.state_file, landmarks.as_deref())?;
                let payload = read_input(&data)?;
                Ok(analyzer.analyze_json(&behavior, &payload))
            });
            let result = result.unwrap_or_else(|e| {
                let e = CliError::from(e);
                error!(code = %e.code, message = %e.message, "analysis setup failed");
                DetectionResult::failure(e.message).as_fallback()
            });
            cmd_print(&result, pretty)
        }

        Commands::Batch { data, landmarks } => {
            let analyzer = build_analyzer(app?, cli.state_file, landmarks.as_deref())?;
            let batch: serde_json::Value = serde_json::from_str(&read_input(&data)?)?;
            println!("{}", analyzer.analyze_batch(&batch).to_json()?);
            Ok(())
        }

        Commands::Status => cmd_status(),

        Commands::State { reset } => {
            let app = app?;
            let path = cli.state_file.unwrap_or(app.state_file);
            cmd_state(&path, reset)
        }
    }
}

fn build_analyzer(
    app: AppConfig,
    state_file: Option<PathBuf>,
    landmarks: Option<&Path>,
) -> Result<BehaviorAnalyzer, KinesenseCliError> {
    let store = FilePostureStore::new(state_file.unwrap_or(app.state_file));
    let mut analyzer = BehaviorAnalyzer::new(app.detectors, Arc::new(store));
    if let Some(path) = landmarks {
        let estimator = PrecomputedEstimator::from_file(path).map_err(KinesenseCliError::Landmarks)?;
        analyzer = analyzer.with_estimator(Arc::new(estimator));
    }
    Ok(analyzer)
}

fn read_input(path: &Path) -> Result<String, KinesenseCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else if path.exists() {
        Ok(fs::read_to_string(path)?)
    } else {
        Err(KinesenseCliError::MissingData(path.to_path_buf()))
    }
}

fn cmd_print(result: &DetectionResult, pretty: bool) -> Result<(), KinesenseCliError> {
    let json = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_status() -> Result<(), KinesenseCliError> {
    let report = StatusReport {
        producer: "kinesense".to_string(),
        version: KINESENSE_VERSION.to_string(),
        models: BehaviorAnalyzer::default()
            .model_status()
            .into_iter()
            .map(|(behavior, status)| (behavior.to_string(), status))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_state(path: &Path, reset: bool) -> Result<(), KinesenseCliError> {
    let store = FilePostureStore::new(path);
    if reset {
        store.reset()?;
    }
    let record = PostureRecord::from_state(&store.load()?);
    let report = StateReport {
        state_file: path.display().to_string(),
        reset,
        record,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum KinesenseCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Config(DetectError),
    Landmarks(DetectError),
    Store(StoreError),
    MissingData(PathBuf),
}

impl From<io::Error> for KinesenseCliError {
    fn from(e: io::Error) -> Self {
        KinesenseCliError::Io(e)
    }
}

impl From<serde_json::Error> for KinesenseCliError {
    fn from(e: serde_json::Error) -> Self {
        KinesenseCliError::Json(e)
    }
}

impl From<StoreError> for KinesenseCliError {
    fn from(e: StoreError) -> Self {
        KinesenseCliError::Store(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<KinesenseCliError> for CliError {
    fn from(e: KinesenseCliError) -> Self {
        match e {
            KinesenseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: format!("Failed to read input file: {e}"),
                hint: Some("Check file paths and permissions".to_string()),
            },
            KinesenseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            KinesenseCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Fix the config file or run without --config".to_string()),
            },
            KinesenseCliError::Landmarks(e) => CliError {
                code: "LANDMARKS_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Expected {\"frames\": [{\"hands\": [...], \"pose\": [...], \"face\": [...]}]}".to_string()),
            },
            KinesenseCliError::Store(e) => CliError {
                code: "STATE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check that the state file directory is writable".to_string()),
            },
            KinesenseCliError::MissingData(path) => CliError {
                code: "DATA_NOT_FOUND".to_string(),
                message: format!("Data file not found: {}", path.display()),
                hint: Some("Pass an existing file or - for stdin".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct StatusReport {
    producer: String,
    version: String,
    models: std::collections::BTreeMap<String, kinesense::ModelStatus>,
}

#[derive(serde::Serialize)]
struct StateReport {
    state_file: String,
    reset: bool,
    record: PostureRecord,
}
