//! FRAM CLI - Command-line interface for the FRAM engine
//!
//! Commands:
//! - score: Score a roster (CSV or JSON request) into FRM and workload scores
//! - validate: Validate a roster without running the simulation
//! - doctor: Diagnose engine health and configuration
//! - schema: Print the request and response schemas

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use fram_engine::types::{FrmModelRequest, FrmModelResponse};
use fram_engine::{workload_scores, EntityMapper, ScoreGenerator, SimulationConfig, FRAM_VERSION, PRODUCER_NAME};

/// Number of fixed roster columns before the optional crew route and night stop
const REQUIRED_COLUMNS: usize = 22;

/// FRAM - fatigue risk scoring for crew duty schedules
#[derive(Parser)]
#[command(name = "fram")]
#[command(author = "FRM Analytics")]
#[command(version = FRAM_VERSION)]
#[command(about = "Score crew rosters for fatigue risk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a roster
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,

        /// Simulation limits (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Skip the sleep/wake simulation and return FRAM workload scores only
        #[arg(long)]
        workload_only: bool,
    },

    /// Validate a roster without scoring it
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine health and configuration
    Doctor {
        /// Check a simulation config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Roster CSV with a header row and one duty per line
    Csv,
    /// FrmModelRequest JSON object
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one duty per line)
    Ndjson,
    /// Single JSON report
    Json,
    /// Pretty-printed JSON report
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Roster input (CSV columns / FrmModelRequest)
    Input,
    /// Score output (FrmModelResponse)
    Output,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::level_filters::LevelFilter::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FramCliError> {
    match cli.command {
        Commands::Score {
            input,
            output,
            input_format,
            output_format,
            config,
            workload_only,
        } => cmd_score(&input, &output, input_format, output_format, config.as_deref(), workload_only),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
        Commands::Schema { schema_type, json_schema } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_score(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    workload_only: bool,
) -> Result<(), FramCliError> {
    let run_id = Uuid::new_v4();
    let request = read_request(input, &input_format)?;
    if request.is_empty() {
        return Err(FramCliError::NoDuties);
    }

    let config = match config {
        Some(path) => load_config(path)?,
        None => SimulationConfig::default(),
    };
    info!(%run_id, duties = request.len(), workload_only, "scoring roster");

    let started = Utc::now();
    let response = if workload_only {
        workload_scores(Some(&request))
    } else {
        ScoreGenerator::with_config(config).generate(Some(&request))
    };
    debug!(%run_id, elapsed_ms = (Utc::now() - started).num_milliseconds(), "scored roster");

    let report = ScoreReport {
        run_id: run_id.to_string(),
        producer: PRODUCER_NAME.to_string(),
        version: FRAM_VERSION.to_string(),
        generated_at: started.naive_utc(),
        duty_count: request.len(),
        response,
    };
    write_output(output, &format_output(&report, &output_format)?)?;

    if report.response.is_success() {
        Ok(())
    } else {
        Err(FramCliError::ScoringFailed {
            number: report.response.error_number,
            description: report.response.error_description.unwrap_or_default(),
        })
    }
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), FramCliError> {
    let request = read_request(input, &input_format)?;

    let (block_sizes, error) = match EntityMapper::duty_blocks(Some(&request)) {
        Ok(blocks) => (blocks.iter().map(|b| b.duty_count()).collect(), None),
        Err(e) => (Vec::new(), Some(ValidationErrorDetail {
            error_number: e.error_number(),
            error: e.to_string(),
        })),
    };
    let report = ValidationReport {
        total_duties: request.len(),
        blocks: block_sizes.len(),
        block_sizes,
        error,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total duties: {}", report.total_duties);
        println!("Duty blocks:  {}", report.blocks);
        if !report.block_sizes.is_empty() {
            let sizes: Vec<String> = report.block_sizes.iter().map(ToString::to_string).collect();
            println!("Block sizes:  {}", sizes.join(", "));
        }
        if let Some(err) = &report.error {
            println!("\nError {}: {}", err.error_number, err.error);
        }
    }

    match report.error {
        Some(err) => Err(FramCliError::ValidationFailed(err.error)),
        None => Ok(()),
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), FramCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "fram_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("FRAM engine version {}", FRAM_VERSION),
    });

    let defaults = SimulationConfig::default();
    checks.push(DoctorCheck {
        name: "default_limits".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "{} filter steps, {} grid escalations",
            defaults.max_filter_steps, defaults.max_grid_escalations
        ),
    });

    if let Some(path) = config {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist".to_string(),
            }
        } else {
            match load_config(path) {
                Ok(cfg) if cfg.max_filter_steps == 0 => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: "max_filter_steps must be at least 1".to_string(),
                },
                Ok(cfg) if cfg.max_grid_escalations > 4 => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("max_grid_escalations {} is capped at 4", cfg.max_grid_escalations),
                },
                Ok(cfg) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid ({} filter steps, {} grid escalations)",
                        cfg.max_filter_steps, cfg.max_grid_escalations
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input FILE)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FRAM_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("FRAM Doctor Report");
        println!("==================");
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
        Err(FramCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), FramCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", input_json_schema());
            } else {
                println!("Input: roster CSV with a header row, one duty per line");
                println!();
                for (i, (name, kind)) in CSV_COLUMNS.iter().enumerate() {
                    let optional = if i >= REQUIRED_COLUMNS { " (optional)" } else { "" };
                    println!("{:>3}. {:<28} {}{}", i + 1, name, kind, optional);
                }
                println!();
                println!("Dates are d/M/yyyy; zulu values are d/M/yyyy H:mm.");
                println!("JSON input is an FrmModelRequest object with one array per column.");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", output_json_schema());
            } else {
                println!("Output: score report");
                println!();
                println!("- run_id, producer, version, generated_at, duty_count");
                println!("- response:");
                println!("  - FRMScore: final scores after the sleep/wake adjustment (N2 text)");
                println!("  - WorkloadScore: FRAM workload scores in request order");
                println!("  - ErrorNumber: 0, or 1001 (null), 1002 (value), 1003 (format), 1004 (other)");
                println!("  - ErrorDescription");
            }
        }
    }
    Ok(())
}

// Input

/// Roster columns in file order with their expected content
const CSV_COLUMNS: [(&str, &str); 24] = [
    ("IdxInBlock", "integer, 1-based"),
    ("OperationalSectorCount", "integer"),
    ("IsaHomeStandbyFlag", "0 or 1"),
    ("StartDateLocalTime", "date"),
    ("StartTimeLocalTime", "HH:mm"),
    ("EndDateLocalTime", "date"),
    ("EndTimeLocalTime", "HH:mm"),
    ("EndDateCrewReferenceTime", "date"),
    ("EndTimeCrewReferenceTime", "HH:mm"),
    ("StartDateTimeZulu", "date time"),
    ("EndDateTimeZulu", "date time"),
    ("DutyLength", "H:mm"),
    ("IsDutyMorningStart", "0 or 1"),
    ("IsDutyEveningFinish", "0 or 1"),
    ("IsDutyNightFinish", "0 or 1"),
    ("IsDutyElongated", "0 or 1"),
    ("IsDutyHighSector", "0 or 1"),
    ("HoursBetweenMidnight", "H:mm"),
    ("IsContactable", "text"),
    ("IsStandby", "text"),
    ("CommuteTime", "H:mm:ss"),
    ("SbyCallout", "text, HOME for home standby"),
    ("CrewRoute", "text"),
    ("NightStopFlag", "text"),
];

fn read_request(input: &Path, format: &InputFormat) -> Result<FrmModelRequest, FramCliError> {
    let data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    match format {
        InputFormat::Json => Ok(serde_json::from_str(&data)?),
        InputFormat::Csv => parse_csv(&data),
    }
}

fn parse_csv(data: &str) -> Result<FrmModelRequest, FramCliError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut columns: Vec<Vec<String>> = vec![Vec::new(); CSV_COLUMNS.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < REQUIRED_COLUMNS {
            return Err(FramCliError::ParseError(format!(
                "row {} has {} columns, expected at least {}",
                line + 1,
                record.len(),
                REQUIRED_COLUMNS
            )));
        }
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or_default().to_string());
        }
    }

    let ints = |i: usize| -> Result<Vec<i32>, FramCliError> {
        columns[i]
            .iter()
            .enumerate()
            .map(|(row, v)| {
                v.parse::<i32>().map_err(|_| {
                    FramCliError::ParseError(format!("row {}: {} is not an integer: {:?}", row + 1, CSV_COLUMNS[i].0, v))
                })
            })
            .collect()
    };
    let texts = |i: usize| Some(columns[i].clone());

    Ok(FrmModelRequest {
        idx_in_block: Some(ints(0)?),
        operational_sector_count: Some(ints(1)?),
        isa_home_standby_flag: Some(ints(2)?),
        start_date_local_time: texts(3),
        start_time_local_time: texts(4),
        end_date_local_time: texts(5),
        end_time_local_time: texts(6),
        end_date_crew_reference_time: texts(7),
        end_time_crew_reference_time: texts(8),
        start_date_time_zulu: texts(9),
        end_date_time_zulu: texts(10),
        duty_length: texts(11),
        is_duty_morning_start: Some(ints(12)?),
        is_duty_evening_finish: Some(ints(13)?),
        is_duty_night_finish: Some(ints(14)?),
        is_duty_elongated: Some(ints(15)?),
        is_duty_high_sector: Some(ints(16)?),
        hours_between_midnight: texts(17),
        is_contactable: texts(18),
        is_standby: texts(19),
        commute_time: texts(20),
        sby_callout: texts(21),
        crew_route: texts(22),
        night_stop_flag: texts(23),
    })
}

fn load_config(path: &Path) -> Result<SimulationConfig, FramCliError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| FramCliError::Config(e.to_string()))
}

// Output

fn format_output(report: &ScoreReport, format: &OutputFormat) -> Result<String, FramCliError> {
    match format {
        OutputFormat::Ndjson => {
            let frm = report.response.frm_score.as_deref().unwrap_or_default();
            let workload = report.response.workload_score.as_deref().unwrap_or_default();
            let rows = frm.len().max(workload.len());
            let mut lines: Vec<String> = Vec::with_capacity(rows);
            for i in 0..rows {
                let line = DutyScoreLine {
                    run_id: &report.run_id,
                    index: i,
                    frm_score: frm.get(i).map(String::as_str),
                    workload_score: workload.get(i).map(String::as_str),
                };
                lines.push(serde_json::to_string(&line)?);
            }
            if !report.response.is_success() {
                lines.push(serde_json::to_string(&report.response)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(report)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(report)? + "\n"),
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), FramCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn input_json_schema() -> String {
    let properties: serde_json::Map<String, serde_json::Value> = CSV_COLUMNS
        .iter()
        .map(|(name, kind)| {
            let item = if kind.starts_with("integer") || kind.starts_with("0 or 1") {
                "integer"
            } else {
                "string"
            };
            (
                name.to_string(),
                serde_json::json!({
                    "type": "array",
                    "items": { "type": item },
                    "description": kind
                }),
            )
        })
        .collect();
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "FrmModelRequest",
        "type": "object",
        "properties": properties
    })
    .to_string()
}

fn output_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "FrmModelResponse",
        "type": "object",
        "required": ["ErrorNumber"],
        "properties": {
            "FRMScore": { "type": ["array", "null"], "items": { "type": "string" } },
            "WorkloadScore": { "type": ["array", "null"], "items": { "type": "string" } },
            "ErrorNumber": { "type": "integer", "enum": [0, 1001, 1002, 1003, 1004] },
            "ErrorDescription": { "type": ["string", "null"] }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum FramCliError {
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Config(String),
    NoDuties,
    ValidationFailed(String),
    ScoringFailed { number: i32, description: String },
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for FramCliError {
    fn from(e: io::Error) -> Self {
        FramCliError::Io(e)
    }
}

impl From<csv::Error> for FramCliError {
    fn from(e: csv::Error) -> Self {
        FramCliError::Csv(e)
    }
}

impl From<serde_json::Error> for FramCliError {
    fn from(e: serde_json::Error) -> Self {
        FramCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FramCliError> for CliError {
    fn from(e: FramCliError) -> Self {
        match e {
            FramCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FramCliError::Csv(e) => CliError {
                code: "CSV_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'fram schema input' for the column order".to_string()),
            },
            FramCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FramCliError::Config(msg) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Expected {\"max_filter_steps\": N, \"max_grid_escalations\": N}".to_string()),
            },
            FramCliError::NoDuties => CliError {
                code: "NO_DUTIES".to_string(),
                message: "No duties found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FramCliError::ValidationFailed(msg) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: msg,
                hint: Some("Fix the reported value and retry".to_string()),
            },
            FramCliError::ScoringFailed { number, description } => CliError {
                code: format!("SCORING_FAILED_{number}"),
                message: description,
                hint: Some("Run 'fram validate' for details".to_string()),
            },
            FramCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            FramCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ScoreReport {
    run_id: String,
    producer: String,
    version: String,
    generated_at: NaiveDateTime,
    duty_count: usize,
    response: FrmModelResponse,
}

#[derive(serde::Serialize)]
struct DutyScoreLine<'a> {
    run_id: &'a str,
    index: usize,
    frm_score: Option<&'a str>,
    workload_score: Option<&'a str>,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_duties: usize,
    blocks: usize,
    block_sizes: Vec<usize>,
    error: Option<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    error_number: i32,
    error: String,
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

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "idx,sectors,hsby,sdate,stime,edate,etime,crdate,crtime,szulu,ezulu,len,ms,ef,nf,el,hs,hbm,ctb,sby,commute,callout";

    #[test]
    fn test_parse_csv_required_columns() {
        let data = format!(
            "{HEADER}\n1,2,0,1/3/2024,08:00,1/3/2024,16:00,1/3/2024,16:00,1/3/2024 07:00,1/3/2024 15:00,08:00,0,0,0,0,0,00:00,0,0,0:45:00,\n"
        );
        let request = parse_csv(&data).unwrap();
        assert_eq!(request.len(), 1);
        assert_eq!(request.idx_in_block, Some(vec![1]));
        assert_eq!(request.commute_time, Some(vec!["0:45:00".to_string()]));
        // optional trailing columns default to empty text
        assert_eq!(request.crew_route, Some(vec![String::new()]));
    }

    #[test]
    fn test_parse_csv_rejects_short_rows() {
        let data = format!("{HEADER}\n1,2,0\n");
        assert!(matches!(parse_csv(&data), Err(FramCliError::ParseError(_))));
    }

    #[test]
    fn test_parse_csv_rejects_non_integer() {
        let data = format!(
            "{HEADER}\nx,2,0,1/3/2024,08:00,1/3/2024,16:00,1/3/2024,16:00,1/3/2024 07:00,1/3/2024 15:00,08:00,0,0,0,0,0,00:00,0,0,0:45:00,\n"
        );
        assert!(matches!(parse_csv(&data), Err(FramCliError::ParseError(_))));
    }

    #[test]
    fn test_ndjson_has_one_line_per_duty() {
        let report = ScoreReport {
            run_id: "run".to_string(),
            producer: PRODUCER_NAME.to_string(),
            version: FRAM_VERSION.to_string(),
            generated_at: NaiveDateTime::default(),
            duty_count: 2,
            response: FrmModelResponse {
                frm_score: Some(vec!["1.00".to_string(), "2.00".to_string()]),
                workload_score: Some(vec!["1".to_string(), "2".to_string()]),
                error_number: 0,
                error_description: None,
            },
        };
        let out = format_output(&report, &OutputFormat::Ndjson).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().next().unwrap().contains("\"frm_score\":\"1.00\""));
    }
}
