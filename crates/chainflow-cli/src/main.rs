//! CLI binary for running and validating chainflow chains.

mod config;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use chainflow_engine::{
    declared_inputs, ChainEngine, FnObserver, GenerationParams, InputMode, LlmGenerator, StepEvent,
};
use chainflow_llm::{LlmClient, LoggingMiddleware};
use chainflow_parse::{parse, template::variable_names, validate, Diagnostic, ParsedChain};
use chainflow_report::{generate_reports, ReportFiles, ReportFormat};

use config::{CliSettings, FileSettings};

#[derive(Parser)]
#[command(name = "chainflow", version, about = "Run sequential LLM prompt chains defined in markdown")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and stream generated text to the terminal
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chain against a seed file
    Run {
        /// File whose contents become the `seed` variable
        #[arg(long)]
        seed_file: PathBuf,

        /// Chain definition file
        #[arg(long)]
        chain_file: PathBuf,

        /// Run name, used as the prefix of every report file
        #[arg(long)]
        name: String,

        /// Write markdown reports
        #[arg(long)]
        markdown: bool,

        /// Write HTML reports
        #[arg(long)]
        html: bool,

        /// YAML settings file
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
        config_file: PathBuf,

        /// Sampling temperature (overrides the config file)
        #[arg(long)]
        temperature: Option<f32>,

        /// Model name (overrides the config file)
        #[arg(long)]
        model_name: Option<String>,

        /// Directory reports are written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Abort a step that takes longer than this many seconds
        #[arg(long)]
        step_timeout_secs: Option<u64>,

        /// How chain inputs are inferred: first-step or closure
        #[arg(long, default_value = "closure")]
        input_mode: InputMode,
    },

    /// Validate a chain definition file
    Validate {
        /// Chain definition file
        chain_file: PathBuf,
    },

    /// Show the steps and inputs of a chain
    Info {
        /// Chain definition file
        chain_file: PathBuf,

        /// How chain inputs are inferred: first-step or closure
        #[arg(long, default_value = "closure")]
        input_mode: InputMode,
    },
}

struct RunArgs {
    seed_file: PathBuf,
    chain_file: PathBuf,
    name: String,
    formats: Vec<ReportFormat>,
    config_file: PathBuf,
    overrides: CliSettings,
    output_dir: PathBuf,
    step_timeout: Option<Duration>,
    input_mode: InputMode,
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            seed_file,
            chain_file,
            name,
            markdown,
            html,
            config_file,
            temperature,
            model_name,
            output_dir,
            step_timeout_secs,
            input_mode,
        } => {
            let formats = output_formats(markdown, html, cli.verbose)?;
            let args = RunArgs {
                seed_file,
                chain_file,
                name,
                formats,
                config_file,
                overrides: CliSettings {
                    model_name,
                    temperature,
                },
                output_dir,
                step_timeout: step_timeout_secs.map(Duration::from_secs),
                input_mode,
                verbose: cli.verbose,
            };
            cmd_run(args).await?;
        }
        Commands::Validate { chain_file } => {
            cmd_validate(&chain_file)?;
        }
        Commands::Info {
            chain_file,
            input_mode,
        } => {
            cmd_info(&chain_file, input_mode)?;
        }
    }

    Ok(())
}

fn load_chain(path: &Path) -> anyhow::Result<ParsedChain> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read chain file '{}': {e}", path.display()))?;
    Ok(parse(&source))
}

/// Report formats requested on the command line. Requesting none is only
/// allowed with `--verbose`, where generated text streams to the terminal.
fn output_formats(markdown: bool, html: bool, verbose: bool) -> anyhow::Result<Vec<ReportFormat>> {
    let mut formats = Vec::new();
    if markdown {
        formats.push(ReportFormat::Markdown);
    }
    if html {
        formats.push(ReportFormat::Html);
    }
    if formats.is_empty() {
        if !verbose {
            anyhow::bail!("No output file types specified. Use --verbose to see output.");
        }
        tracing::warn!("No output file types specified, output is only streamed to the terminal");
    }
    Ok(formats)
}

/// Parse errors followed by lint diagnostics, one line each.
fn problem_lines(chain: &ParsedChain, diagnostics: &[Diagnostic]) -> Vec<String> {
    let mut lines = chain.errors.clone();
    for diag in diagnostics {
        lines.push(format!("{diag} [{}]", diag.rule));
        if let Some(fix) = &diag.fix {
            lines.push(format!("  fix: {fix}"));
        }
    }
    lines
}

/// A chain runs only when it parsed cleanly and no lint rule reported an error.
fn is_runnable(chain: &ParsedChain, diagnostics: &[Diagnostic]) -> bool {
    chain.is_valid() && !diagnostics.iter().any(Diagnostic::is_error)
}

/// Print parse errors and lint diagnostics. Returns true when any is fatal.
fn report_problems(chain: &ParsedChain, diagnostics: &[Diagnostic]) -> bool {
    for line in problem_lines(chain, diagnostics) {
        println!("{line}");
    }
    !is_runnable(chain, diagnostics)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let chain = load_chain(path)?;
    let diagnostics = validate(&chain);

    if chain.is_valid() && diagnostics.is_empty() {
        println!("Chain is valid");
        return Ok(());
    }

    if report_problems(&chain, &diagnostics) {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path, mode: InputMode) -> anyhow::Result<()> {
    let chain = load_chain(path)?;

    println!("Chain: {}", path.display());
    println!("Prompt steps: {}", chain.prompts.len());
    println!("Report steps: {}", chain.reports.len());

    let inputs = declared_inputs(&chain.prompts, mode);
    if !inputs.is_empty() {
        println!("Inputs: {}", inputs.join(", "));
    }

    println!("\nPrompts:");
    for step in &chain.prompts {
        let uses = variable_names(&step.template);
        println!("  {} (section {}) uses [{}]", step.output, step.section, uses.join(", "));
        if let Some(description) = &step.description {
            for line in description.lines() {
                println!("      {line}");
            }
        }
    }

    println!("\nReports:");
    for step in &chain.reports {
        let uses = variable_names(&step.template);
        println!(
            "  {} (section {}) uses [{}]",
            step.file_suffix,
            step.section,
            uses.join(", ")
        );
    }

    if !chain.is_valid() {
        println!("\nErrors:");
        for error in &chain.errors {
            println!("  {error}");
        }
    }

    Ok(())
}

fn print_files(label: &str, files: &[PathBuf]) {
    if files.is_empty() {
        return;
    }
    let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    println!("{label} file(s) created: {}", names.join(", "));
}

fn print_report_files(files: &ReportFiles) {
    print_files("Markdown", files.files(ReportFormat::Markdown));
    print_files("HTML", files.files(ReportFormat::Html));
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    if !args.seed_file.is_file() {
        anyhow::bail!("Seed file '{}' not found.", args.seed_file.display());
    }
    let seed = std::fs::read_to_string(&args.seed_file)?;

    let chain = load_chain(&args.chain_file)?;
    let diagnostics = validate(&chain);
    if report_problems(&chain, &diagnostics) {
        anyhow::bail!("Chain '{}' is invalid", args.chain_file.display());
    }
    let (prompts, reports) = chain.into_result()?;

    let file_settings = FileSettings::load(&args.config_file)?;
    let settings = config::resolve(&args.overrides, &file_settings)?;
    config::require_api_key()?;

    println!("Running chain '{}'", args.name);
    println!("Using seed file '{}'", args.seed_file.display());
    println!(
        "Using model '{}' with temperature {}",
        settings.model_name, settings.temperature
    );

    let client = LlmClient::from_env()?.with_middleware(LoggingMiddleware);
    let params = GenerationParams {
        model: settings.model_name,
        temperature: settings.temperature,
        verbose: args.verbose,
        step_timeout: args.step_timeout,
    };
    let engine = ChainEngine::new(LlmGenerator::new(client), params)
        .with_input_mode(args.input_mode)
        .with_observer(FnObserver(|event: &StepEvent| {
            if let StepEvent::Started { step, .. } = event {
                println!("Running step '{step}'");
            }
        }));

    let output = engine.run(&seed, &prompts).await?;
    let files = generate_reports(
        &args.output_dir,
        &args.name,
        &reports,
        &args.formats,
        &output.variables,
    )?;

    print_report_files(&files);
    println!("Total tokens: {}", output.stats.total_tokens);
    println!("Total cost: ${:.3}", output.stats.total_cost_usd);
    println!("Runtime: {:.2} seconds", output.duration.as_secs_f64());

    Ok(())
}
