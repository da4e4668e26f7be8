use clap::{Parser, Subcommand, ValueEnum};
use component_docgen::{CHANNEL_DESCRIBE_TEMPLATE, Session, SessionOutcome};
use docgen_spec::{
    EvaluationReport, GenerationPolicy, GenerationReport, definition_schema, example_input,
    input_schema, package,
};
use serde_json::{Map, Value, json};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const OUTPUT_DIR_ENV: &str = "DOCGEN_OUTPUT_DIR";
const LOG_ENV: &str = "DOCGEN_LOG";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Template-driven document generator",
    long_about = "Validates input against a template package and renders its documents"
)]
struct Cli {
    /// Log debug events to stderr (overrides DOCGEN_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DescribeFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show the fields, derived values and documents of a template.
    Describe {
        /// Template package (.zip file or directory).
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        /// Optional JSON input to show values and errors for.
        #[arg(long, value_name = "INPUT")]
        input: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = DescribeFormat::Text)]
        format: DescribeFormat,
    },
    /// Print a JSON Schema: of a template's input, or of the definition format itself.
    Schema {
        /// Template package; omit to print the definition format schema.
        #[arg(long, value_name = "TEMPLATE")]
        template: Option<PathBuf>,
        /// Print a sample input instead of the schema.
        #[arg(long, requires = "template")]
        example: bool,
    },
    /// Validate input and print the evaluated fields.
    Evaluate {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        /// JSON object of raw field values.
        #[arg(long, value_name = "INPUT")]
        input: PathBuf,
    },
    /// Evaluate input and write the template's documents.
    Generate {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(long, value_name = "INPUT")]
        input: PathBuf,
        /// Output directory (defaults to DOCGEN_OUTPUT_DIR or the current working directory).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Generate even when some fields were rejected.
        #[arg(long)]
        allow_errors: bool,
    },
    /// Generate documents for every row of a CSV file whose headers are field names.
    Batch {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(long, value_name = "CSV")]
        csv: PathBuf,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Describe {
            template,
            input,
            format,
        } => run_describe(template, input, format),
        Command::Schema { template, example } => run_schema(template, example),
        Command::Evaluate { template, input } => run_evaluate(template, input),
        Command::Generate {
            template,
            input,
            out,
            allow_errors,
        } => run_generate(template, input, out, allow_errors),
        Command::Batch { template, csv, out } => run_batch(template, csv, out),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_session(template: &Path, policy: GenerationPolicy) -> CliResult<Session> {
    let session = Session::new(policy);
    let summary = session.load_package(template)?;
    debug!(template = %summary.name, path = %template.display(), "template ready");
    Ok(session)
}

fn read_input(path: &Path) -> CliResult<Value> {
    let contents = fs::read_to_string(path)?;
    let input: Value = serde_json::from_str(&contents)?;
    if !input.is_object() {
        return Err(format!("{} must contain a JSON object", path.display()).into());
    }
    Ok(input)
}

fn run_describe(template: PathBuf, input: Option<PathBuf>, format: DescribeFormat) -> CliResult<()> {
    let session = load_session(&template, GenerationPolicy::Strict)?;
    let mut request = Map::new();
    if let Some(input) = input {
        request.insert("input".into(), read_input(&input)?);
    }
    let format = match format {
        DescribeFormat::Text => "text",
        DescribeFormat::Json => "json",
    };
    request.insert("format".into(), Value::String(format.into()));

    let response = session.handle(CHANNEL_DESCRIBE_TEMPLATE, &Value::Object(request).to_string());
    let response = parse_component_result(&response)?;
    match response.get("text").and_then(Value::as_str) {
        Some(text) => println!("{text}"),
        None => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}

fn parse_component_result(response: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(response)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(error.into());
    }
    Ok(value)
}

fn run_schema(template: Option<PathBuf>, example: bool) -> CliResult<()> {
    let schema = match template {
        Some(path) => {
            let template = package::open(&path)?;
            if example {
                example_input(&template)
            } else {
                input_schema(&template)
            }
        }
        None => definition_schema(),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn run_evaluate(template: PathBuf, input: PathBuf) -> CliResult<()> {
    let session = load_session(&template, GenerationPolicy::Strict)?;
    let report = session.evaluate(&read_input(&input)?)?;
    println!("{}", serde_json::to_string_pretty(&report.fields)?);
    describe_evaluation(&report);
    if report.is_valid() {
        Ok(())
    } else {
        Err(format!("{} field(s) rejected", report.error_count).into())
    }
}

fn describe_evaluation(report: &EvaluationReport) {
    if report.is_valid() {
        return;
    }
    println!("Errors:");
    for (field, message) in report.error_messages() {
        println!("  {} - {}", field, message);
    }
}

fn describe_generation(report: &GenerationReport) {
    for file in &report.generated_files {
        println!("Generated {}", file.path.display());
    }
    for failure in &report.errors {
        println!("Failed {}: {}", failure.filename, failure.error);
    }
}

fn run_generate(
    template: PathBuf,
    input: PathBuf,
    out: Option<PathBuf>,
    allow_errors: bool,
) -> CliResult<()> {
    let policy = if allow_errors {
        GenerationPolicy::Relaxed
    } else {
        GenerationPolicy::Strict
    };
    let session = load_session(&template, policy)?;
    let input = read_input(&input)?;
    let out_root = resolve_output_root(out)?;

    let SessionOutcome {
        evaluation,
        generation,
    } = session.evaluate_and_generate(&input, &out_root)?;
    describe_evaluation(&evaluation);
    let Some(generation) = generation else {
        return Err(format!(
            "{} field(s) rejected; no documents generated",
            evaluation.error_count
        )
        .into());
    };
    describe_generation(&generation);
    if generation.error_count > 0 {
        return Err(format!("{} document(s) failed", generation.error_count).into());
    }
    Ok(())
}

fn run_batch(template: PathBuf, csv_path: PathBuf, out: Option<PathBuf>) -> CliResult<()> {
    let session = load_session(&template, GenerationPolicy::Strict)?;
    let out_root = resolve_output_root(out)?;
    let mut reader = csv::Reader::from_path(&csv_path)?;
    let headers = reader.headers()?.clone();

    let mut rows = 0;
    let mut failed_rows = 0;
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        rows += 1;
        let record = record?;
        let input: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.to_string(), json!(value)))
            .collect();

        let outcome = session.evaluate_and_generate(&Value::Object(input), &out_root)?;
        match outcome.generation {
            None => {
                failed_rows += 1;
                let messages: Vec<_> = outcome
                    .evaluation
                    .error_messages()
                    .map(|(field, message)| format!("{field}: {message}"))
                    .collect();
                println!("row {}: invalid ({})", row, messages.join("; "));
            }
            Some(generation) => {
                let names: Vec<_> = generation
                    .generated_files
                    .iter()
                    .map(|file| file.filename.as_str())
                    .collect();
                println!("row {}: generated {}", row, names.join(", "));
                for failure in &generation.errors {
                    println!("row {}: failed {}: {}", row, failure.filename, failure.error);
                }
                if generation.error_count > 0 {
                    failed_rows += 1;
                }
            }
        }
    }

    info!(rows, failed = failed_rows, "batch finished");
    if failed_rows > 0 {
        return Err(format!("{failed_rows} of {rows} row(s) failed").into());
    }
    Ok(())
}

fn resolve_output_root(out: Option<PathBuf>) -> CliResult<PathBuf> {
    let candidate = match out {
        Some(path) => path,
        None => env::var_os(OUTPUT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    if candidate.as_os_str().is_empty() {
        return Err("output directory cannot be empty".into());
    }
    fs::create_dir_all(&candidate)?;
    Ok(candidate)
}
