//! Strikes CLI - Command-line interface for Strike Flux
//!
//! Commands:
//! - replay: Run a recorded NDJSON session through the pipeline
//! - decode: Decode one hex telemetry frame
//! - schema: Print the snapshot or replay schema
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use strike_flux::broadcaster::Frame;
use strike_flux::config::AnalyticsConfig;
use strike_flux::decoder::{SampleDecoder, FRAME_SIZE};
use strike_flux::replay::{replay_ndjson, ReplayReport};
use strike_flux::{AnalyticsError, PRODUCER_NAME, STRIKE_FLUX_VERSION};

/// Strikes - punch detection and session analytics for dual-glove telemetry
#[derive(Parser)]
#[command(name = "strikes")]
#[command(version = STRIKE_FLUX_VERSION)]
#[command(about = "Turn glove telemetry into punch analytics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Detector and pipeline knobs shared by commands that build a pipeline
#[derive(clap::Args)]
struct ConfigArgs {
    /// Load configuration from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Punch threshold (m/s²)
    #[arg(long)]
    threshold: Option<f64>,

    /// Debounce window (ms)
    #[arg(long)]
    debounce_ms: Option<u32>,

    /// Punches kept per glove in recent_punches
    #[arg(long)]
    recent_capacity: Option<usize>,

    /// Broadcast tick interval (ms)
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recorded NDJSON session through the pipeline
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// What to emit
        #[arg(long, default_value = "broadcasts")]
        emit: Emit,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Decode one hex telemetry frame
    Decode {
        /// 20-byte frame as hex (whitespace ignored)
        hex: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum Emit {
    /// Every snapshot an observer would have received
    Broadcasts,
    /// Detected punches only
    Events,
    /// Run summary with per-session final snapshots
    Report,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON
    Ndjson,
    /// JSON array
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Session snapshot sent to observers
    Snapshot,
    /// Replay input records
    Replay,
}

fn main() -> ExitCode {
    init_logging();
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

/// Logs go to stderr so stdout stays machine-readable
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strike_flux=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), StrikesCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            emit,
            output_format,
            config,
        } => cmd_replay(&input, &output, emit, output_format, &config),

        Commands::Decode { hex, json } => cmd_decode(&hex, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),

        Commands::Doctor { config, json } => cmd_doctor(&config, json),
    }
}

/// File, then environment, then flags
fn load_config(args: &ConfigArgs) -> Result<AnalyticsConfig, StrikesCliError> {
    let mut config = match &args.config {
        Some(path) => AnalyticsConfig::from_json(&fs::read_to_string(path)?)?,
        None => AnalyticsConfig::default(),
    }
    .with_env_overrides()?;

    if let Some(threshold) = args.threshold {
        config.detector.threshold = threshold;
    }
    if let Some(debounce_ms) = args.debounce_ms {
        config.detector.debounce_ms = debounce_ms;
    }
    if let Some(recent_capacity) = args.recent_capacity {
        config.recent_capacity = recent_capacity;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    config.validate()?;
    Ok(config)
}

fn read_input(input: &Path) -> Result<String, StrikesCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    emit: Emit,
    output_format: OutputFormat,
    config: &ConfigArgs,
) -> Result<(), StrikesCliError> {
    let config = load_config(config)?;
    let input_data = read_input(input)?;

    let (report, frames) = replay_ndjson(&input_data, config)?;
    if report.records == 0 {
        return Err(StrikesCliError::NoRecords);
    }

    let output_data = match emit {
        Emit::Broadcasts => format_frames(&frames, &output_format)?,
        Emit::Events => format_values(&report.events, &output_format)?,
        Emit::Report => format_report(&report, &output_format)?,
    };

    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_decode(hex: &str, json: bool) -> Result<(), StrikesCliError> {
    let sample = SampleDecoder::decode_hex(hex)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sample)?);
    } else {
        println!("{}", sample);
        println!(
            "charging={} calibrated={} |a|={:.2} m/s²",
            sample.charging,
            sample.calibrated,
            sample.magnitude()
        );
    }
    Ok(())
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), StrikesCliError> {
    match schema_type {
        SchemaType::Snapshot => {
            if json_schema {
                println!("{}", snapshot_json_schema());
            } else {
                println!("Session snapshot ({} {})", PRODUCER_NAME, STRIKE_FLUX_VERSION);
                println!();
                println!("- active: true while a session runs (paused or not)");
                println!("- paused: true while paused");
                println!("- elapsed_sec: seconds since start, paused time included");
                println!("- left / right:");
                println!("  - connected, calibrated, battery, packet_loss");
                println!("  - punch_count, punch_breakdown {{ straight, hook, uppercut, unknown }}");
                println!("  - max_force, avg_force, ppm");
                println!("  - recent_punches: [{{ hand, type, force, rotation_z, ts, count }}]");
                println!("  - current_accel [x, y, z] m/s², current_gyro [x, y, z] °/s");
                println!("- combined: total_punches, avg_force, max_force, ppm, pps, intensity_score");
            }
        }
        SchemaType::Replay => {
            if json_schema {
                println!("{}", replay_json_schema());
            } else {
                println!("Replay input: one JSON record per line, tagged by \"type\"");
                println!();
                println!("- frame:   {{ source, hex }}  raw {}-byte frame", FRAME_SIZE);
                println!("- sample:  {{ source, accel, gyro, ts, seq?, battery?, calibrated? }}");
                println!("- connect: {{ source, connected }}");
                println!("- command: {{ command: start | pause | resume | stop | reset }}");
                println!("- advance: {{ ms }}  move the clock, ticking on interval boundaries");
                println!("- tick:    {{}}  broadcast without moving the clock");
                println!();
                println!("source is \"left\" or \"right\"");
            }
        }
    }
    Ok(())
}

fn cmd_doctor(args: &ConfigArgs, json: bool) -> Result<(), StrikesCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Strike Flux version {}", STRIKE_FLUX_VERSION),
    });

    let config = match load_config(args) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "threshold {} m/s², debounce {} ms, recent {} punches, tick {} ms",
                    config.detector.threshold,
                    config.detector.debounce_ms,
                    config.recent_capacity,
                    config.tick_interval_ms
                ),
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
            None
        }
    };

    if let Some(config) = &config {
        if config.detector.debounce_ms < 100 {
            checks.push(DoctorCheck {
                name: "debounce".to_string(),
                status: CheckStatus::Warning,
                message: "Debounce under 100 ms will count one strike several times at 100 Hz"
                    .to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass a replay file with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: STRIKE_FLUX_VERSION.to_string(),
        config,
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Strikes Doctor Report");
        println!("=====================");
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
        Err(StrikesCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn format_frames(frames: &[Frame], format: &OutputFormat) -> Result<String, StrikesCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for frame in frames {
                out.push_str(frame);
                out.push('\n');
            }
            Ok(out)
        }
        // Frames are already JSON objects
        OutputFormat::Json => {
            let joined: Vec<&str> = frames.iter().map(|f| f.as_ref()).collect();
            Ok(format!("[{}]\n", joined.join(",")))
        }
        OutputFormat::JsonPretty => {
            let values = frames
                .iter()
                .map(|f| serde_json::from_str::<serde_json::Value>(f))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::to_string_pretty(&values)? + "\n")
        }
    }
}

fn format_values<T: serde::Serialize>(
    values: &[T],
    format: &OutputFormat,
) -> Result<String, StrikesCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for value in values {
                lines.push(serde_json::to_string(value)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(values)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(values)? + "\n"),
    }
}

fn format_report(report: &ReplayReport, format: &OutputFormat) -> Result<String, StrikesCliError> {
    match format {
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(report)? + "\n"),
        OutputFormat::Ndjson | OutputFormat::Json => Ok(serde_json::to_string(report)? + "\n"),
    }
}

fn snapshot_json_schema() -> String {
    let source_state = serde_json::json!({
        "type": "object",
        "properties": {
            "connected": { "type": "boolean" },
            "calibrated": { "type": "boolean" },
            "battery": { "type": "integer", "minimum": 0, "maximum": 100 },
            "packet_loss": { "type": "number", "minimum": 0 },
            "punch_count": { "type": "integer", "minimum": 0 },
            "punch_breakdown": {
                "type": "object",
                "properties": {
                    "straight": { "type": "integer" },
                    "hook": { "type": "integer" },
                    "uppercut": { "type": "integer" },
                    "unknown": { "type": "integer" }
                },
                "required": ["straight", "hook", "uppercut", "unknown"]
            },
            "max_force": { "type": "number" },
            "avg_force": { "type": "number" },
            "ppm": { "type": "number" },
            "recent_punches": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "hand": { "enum": ["left", "right"] },
                        "type": { "enum": ["straight", "hook", "uppercut", "unknown"] },
                        "force": { "type": "number" },
                        "rotation_z": { "type": "number" },
                        "ts": { "type": "integer" },
                        "count": { "type": "integer", "minimum": 1 }
                    }
                }
            },
            "current_accel": { "type": "array", "items": { "type": "number" }, "minItems": 3, "maxItems": 3 },
            "current_gyro": { "type": "array", "items": { "type": "number" }, "minItems": 3, "maxItems": 3 }
        }
    });

    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Strike Flux session snapshot",
        "type": "object",
        "required": ["active", "paused", "elapsed_sec", "left", "right", "combined"],
        "properties": {
            "active": { "type": "boolean" },
            "paused": { "type": "boolean" },
            "elapsed_sec": { "type": "number", "minimum": 0 },
            "left": source_state,
            "right": source_state,
            "combined": {
                "type": "object",
                "properties": {
                    "total_punches": { "type": "integer" },
                    "avg_force": { "type": "number" },
                    "max_force": { "type": "number" },
                    "ppm": { "type": "number" },
                    "pps": { "type": "number" },
                    "intensity_score": { "type": "integer" }
                }
            }
        }
    })
    .to_string()
}

fn replay_json_schema() -> String {
    let source = serde_json::json!({ "enum": ["left", "right"] });
    let vec3 = serde_json::json!({ "type": "array", "items": { "type": "number" }, "minItems": 3, "maxItems": 3 });

    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Strike Flux replay record",
        "oneOf": [
            {
                "properties": {
                    "type": { "const": "frame" },
                    "source": source,
                    "hex": { "type": "string" }
                },
                "required": ["type", "source", "hex"]
            },
            {
                "properties": {
                    "type": { "const": "sample" },
                    "source": source,
                    "accel": vec3,
                    "gyro": vec3,
                    "ts": { "type": "integer" },
                    "seq": { "type": "integer" },
                    "battery": { "type": "integer" },
                    "calibrated": { "type": "boolean" }
                },
                "required": ["type", "source", "accel", "gyro", "ts"]
            },
            {
                "properties": {
                    "type": { "const": "connect" },
                    "source": source,
                    "connected": { "type": "boolean" }
                },
                "required": ["type", "source", "connected"]
            },
            {
                "properties": {
                    "type": { "const": "command" },
                    "command": { "enum": ["start", "pause", "resume", "stop", "reset"] }
                },
                "required": ["type", "command"]
            },
            {
                "properties": {
                    "type": { "const": "advance" },
                    "ms": { "type": "integer", "minimum": 0 }
                },
                "required": ["type", "ms"]
            },
            {
                "properties": { "type": { "const": "tick" } },
                "required": ["type"]
            }
        ]
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum StrikesCliError {
    Io(io::Error),
    Analytics(AnalyticsError),
    Json(serde_json::Error),
    NoRecords,
    DoctorFailed,
}

impl From<io::Error> for StrikesCliError {
    fn from(e: io::Error) -> Self {
        StrikesCliError::Io(e)
    }
}

impl From<AnalyticsError> for StrikesCliError {
    fn from(e: AnalyticsError) -> Self {
        StrikesCliError::Analytics(e)
    }
}

impl From<serde_json::Error> for StrikesCliError {
    fn from(e: serde_json::Error) -> Self {
        StrikesCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StrikesCliError> for CliError {
    fn from(e: StrikesCliError) -> Self {
        match e {
            StrikesCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StrikesCliError::Analytics(e) => {
                let (code, hint) = match &e {
                    AnalyticsError::ReplayParse { .. } => {
                        ("REPLAY_PARSE_ERROR", "Run 'strikes schema replay' for the record format")
                    }
                    AnalyticsError::InvalidConfig(_) => {
                        ("CONFIG_ERROR", "Check --config and STRIKE_* environment variables")
                    }
                    AnalyticsError::MalformedFrame { .. } | AnalyticsError::InvalidHex(_) => {
                        ("FRAME_ERROR", "Frames are 20 bytes, 40 hex digits")
                    }
                    _ => ("ANALYTICS_ERROR", "Re-run with RUST_LOG=strike_flux=debug"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            StrikesCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StrikesCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No replay records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            StrikesCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    config: Option<AnalyticsConfig>,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
