use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use arxiv_harvester::app::{App, HarvestResult, ProgressSinkKind};
use arxiv_harvester::arxiv::ArxivHttpClient;
use arxiv_harvester::config::ConfigLoader;
use arxiv_harvester::error::HarvestError;
use arxiv_harvester::fetcher::HttpDocumentClient;
use arxiv_harvester::output::{JsonOutput, OutputMode};
use arxiv_harvester::tui::Tui;

#[derive(Parser)]
#[command(name = "arxiv-harvest")]
#[command(about = "Collect arXiv metadata and download the matching PDFs")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to a JSON config file (defaults to ./arxiv-harvest.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    #[command(about = "Collect metadata, then download every paper (default)")]
    Run,
    #[command(about = "Query arXiv and write the metadata file only")]
    Collect,
    #[command(about = "Download papers listed in an existing metadata file")]
    Fetch,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_) => 2,
        HarvestError::ArxivHttp(_)
        | HarvestError::ArxivQuery(_)
        | HarvestError::ArxivStatus { .. }
        | HarvestError::FeedParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
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
    let command = cli.command.unwrap_or(Commands::Run);

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let search = ArxivHttpClient::from_config(&config)?;
    let documents = HttpDocumentClient::from_config(&config)?;
    let app = App::new(config, search, documents);

    let kind = match command {
        Commands::Run => ProgressSinkKind::Run,
        Commands::Collect => ProgressSinkKind::Collect,
        Commands::Fetch => ProgressSinkKind::Fetch,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = match command {
                Commands::Run => app.run(&JsonOutput),
                Commands::Collect => app.collect(&JsonOutput),
                Commands::Fetch => app.fetch(&JsonOutput),
            }?;
            JsonOutput::print_result(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(kind);
            let result = tui.run(move |sink| match command {
                Commands::Run => app.run(sink),
                Commands::Collect => app.collect(sink),
                Commands::Fetch => app.fetch(sink),
            })?;
            print_summary(&result);
            Ok(())
        }
    }
}

fn print_summary(result: &HarvestResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}arxiv-harvest summary{reset}");
    println!("{green}Records collected: {}{reset}", result.records);
    println!("{cyan}Metadata: {}{reset}", result.metadata_path);

    let Some(downloads) = &result.downloads else {
        return;
    };
    println!("{cyan}PDFs: {}{reset}", result.pdf_dir);
    println!("{green}Downloaded: {}{reset}", downloads.downloaded);
    println!("{yellow}Skipped (already on disk): {}{reset}", downloads.skipped);
    let color = if downloads.failed == 0 { green } else { red };
    println!("{color}Errors: {}{reset}", downloads.failed);
    for failure in &downloads.errors {
        println!("{red}  paper {} {}: {}{reset}", failure.index, failure.pdf_url, failure.message);
    }
}
