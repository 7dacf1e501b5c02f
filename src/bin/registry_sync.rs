use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use registry_sync::app::{App, ListResult, RunReport};
use registry_sync::config::{ConfigLoader, Settings};
use registry_sync::domain::Record;
use registry_sync::error::RegistryError;
use registry_sync::fetcher::{FetchState, Fetcher, SearchBackend, SearchSession};
use registry_sync::output::{ConsoleProgress, JsonOutput, OutputMode};
use registry_sync::remote::{RemoteStore, SheetsHttpClient};
use registry_sync::source::IspHttpBackend;
use registry_sync::store::LocalStore;

#[derive(Parser)]
#[command(name = "registry-sync")]
#[command(about = "Find ISP registry records for active ingredients, reusing local and shared caches")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch registry records for the given active ingredients")]
    Run(RunArgs),
    #[command(about = "Show records in the local store")]
    List,
}

#[derive(Args)]
struct RunArgs {
    #[arg(value_name = "INGREDIENT")]
    ingredients: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<RegistryError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &RegistryError) -> u8 {
    match error {
        RegistryError::Configuration { .. } => 2,
        RegistryError::RemoteUnavailable(_) => 3,
        RegistryError::FetchFailed { .. }
        | RegistryError::SourceHttp(_)
        | RegistryError::SourceStatus { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Some(Commands::Run(args)) => {
            if args.ingredients.is_empty() {
                let mut command = Cli::command();
                let usage = command
                    .find_subcommand_mut("run")
                    .map(|sub| sub.render_usage().to_string())
                    .unwrap_or_default();
                eprintln!("error: at least one active ingredient is required\n\n{usage}");
                return Ok(ExitCode::from(1));
            }
            let settings = ConfigLoader::resolve(cli.config.as_deref())?;
            run_fetch(&settings, &args.ingredients, output_mode)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::List) => {
            let settings = ConfigLoader::resolve(cli.config.as_deref())?;
            run_list(&settings, output_mode)?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let mut command = Cli::command();
            eprintln!("{}", command.render_help());
            Ok(ExitCode::from(1))
        }
    }
}

fn run_fetch(
    settings: &Settings,
    ingredients: &[String],
    output_mode: OutputMode,
) -> miette::Result<()> {
    let local = LocalStore::new(settings.local_store_path.clone());
    let remote = SheetsHttpClient::new(settings)?;
    let backend = IspHttpBackend::new(settings.source_url.clone(), settings.source_timeout);
    let app = App::new(local, remote, Fetcher::new(backend, settings.retry));

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.run(ingredients, &JsonOutput)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = app.run(ingredients, &ConsoleProgress)?;
            print_run_summary(&report);
        }
    }
    Ok(())
}

fn run_list(settings: &Settings, output_mode: OutputMode) -> miette::Result<()> {
    let local = LocalStore::new(settings.local_store_path.clone());
    let app = App::new(local, NopRemote, Fetcher::new(NopBackend, settings.retry));

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.list(&JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.list(&ConsoleProgress)?;
            print_list_summary(&result);
        }
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}📋 registry-sync summary{reset}");
    if !report.already_known.is_empty() {
        let known: Vec<&str> = report.already_known.iter().map(String::as_str).collect();
        println!("{green}♻️ Already stored: {}{reset}", known.join(", "));
    }
    if report.to_fetch.is_empty() {
        println!("{green}✅ All requested active ingredients are already stored.{reset}");
        return;
    }

    println!("{cyan}🔍 Searched: {}{reset}", report.to_fetch.join(", "));
    for outcome in &report.outcomes {
        let color = match outcome.state {
            FetchState::RecordsCollected => green,
            _ => yellow,
        };
        println!(
            "{color}   • {} ({}, {} row(s)){reset}",
            outcome.ingredient, outcome.state, outcome.records
        );
    }
    println!(
        "{green}⬇️ New rows: {} local, {} spreadsheet{reset}",
        report.appended_local, report.appended_remote
    );
}

fn print_list_summary(result: &ListResult) {
    if !result.exists {
        println!("local store {} does not exist yet", result.path);
        return;
    }
    println!("{} record(s) in {}", result.records.len(), result.path);
    for record in &result.records {
        println!(
            "  {} | {} | {} | {} | {} | {}",
            record.registration_id,
            record.product_name,
            record.registration_date,
            record.company,
            record.active_ingredient,
            record.legal_control
        );
    }
}

struct NopRemote;
struct NopBackend;
struct NopSession;

impl RemoteStore for NopRemote {
    fn read_range(&self) -> Result<Vec<Record>, RegistryError> {
        Err(RegistryError::RemoteUnavailable(
            "spreadsheet client not configured".to_string(),
        ))
    }

    fn append_rows(&self, _rows: &[Record]) -> Result<(), RegistryError> {
        Err(RegistryError::RemoteUnavailable(
            "spreadsheet client not configured".to_string(),
        ))
    }
}

impl SearchBackend for NopBackend {
    type Session = NopSession;

    fn open(&self) -> Result<NopSession, RegistryError> {
        Err(RegistryError::SourceHttp(
            "registry search not configured".to_string(),
        ))
    }
}

impl SearchSession for NopSession {
    fn navigate(&mut self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn fill_form(&mut self, _ingredient: &str) -> Result<(), RegistryError> {
        Ok(())
    }

    fn submit(&mut self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn result_count(&mut self) -> Result<usize, RegistryError> {
        Ok(0)
    }

    fn download(&mut self, _ingredient: &str) -> Result<Vec<Record>, RegistryError> {
        Ok(Vec::new())
    }

    fn close(&mut self) -> Result<(), RegistryError> {
        Ok(())
    }
}
