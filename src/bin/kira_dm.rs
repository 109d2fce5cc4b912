use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_dataset_manifest::app::{App, DatasetSummary};
use kira_dataset_manifest::config::{Settings, SettingsOverrides};
use kira_dataset_manifest::domain::EntryOptions;
use kira_dataset_manifest::error::ManifestError;
use kira_dataset_manifest::fetch::FetchReport;
use kira_dataset_manifest::output::JsonOutput;
use kira_dataset_manifest::registry::{RegisterOptions, SearchOptions};
use kira_dataset_manifest::transport::SystemTransport;

#[derive(Parser)]
#[command(name = "kira-dm")]
#[command(about = "Reproducible dataset manifests: register, fetch and verify remote datasets")]
#[command(version, author)]
struct Cli {
    /// Manifest file (default: $KIRA_DM_MANIFEST or ./datasets.toml)
    #[arg(long, global = true)]
    manifest: Option<String>,

    /// Folder fetched datasets are stored under (default: $KIRA_DM_CACHE_DIR)
    #[arg(long, global = true)]
    root: Option<String>,

    #[arg(long, global = true)]
    skip_checksum: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Register a dataset in the manifest")]
    Add(AddArgs),
    #[command(about = "Fetch datasets (all when no name is given)")]
    Fetch(FetchArgs),
    #[command(about = "Search datasets by name, alias, DOI, key or path")]
    Search(SearchArgs),
    #[command(about = "Print the local path of a dataset")]
    Path(PathArgs),
    #[command(about = "List registered datasets")]
    List,
    #[command(about = "Show dataset info")]
    Info(NameArgs),
    #[command(about = "Remove a dataset from the manifest (files stay on disk)")]
    Remove(NameArgs),
}

#[derive(Args)]
struct AddArgs {
    uri: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    no_check_duplicate: bool,

    #[arg(long)]
    version: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    #[arg(long)]
    doi: Option<String>,

    #[arg(long = "alias")]
    aliases: Vec<String>,

    #[arg(long)]
    key: Option<String>,

    #[arg(long)]
    sha256: Option<String>,

    #[arg(long)]
    skip_entry_checksum: bool,

    #[arg(long)]
    skip_download: bool,

    #[arg(long)]
    extract: bool,

    #[arg(long)]
    format: Option<String>,

    /// Fetch the dataset right after registering it
    #[arg(long)]
    fetch: bool,
}

#[derive(Args)]
struct FetchArgs {
    names: Vec<String>,

    #[arg(long, conflicts_with = "no_extract")]
    extract: bool,

    #[arg(long)]
    no_extract: bool,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    #[arg(long)]
    partial: bool,

    /// Only match dataset names
    #[arg(long)]
    names_only: bool,
}

#[derive(Args)]
struct PathArgs {
    name: String,

    #[arg(long)]
    extract: bool,
}

#[derive(Args)]
struct NameArgs {
    name: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ManifestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ManifestError) -> u8 {
    match error {
        ManifestError::NotFound(_) | ManifestError::MultipleMatches { .. } => 2,
        ManifestError::Transport { .. }
        | ManifestError::HttpStatus { .. }
        | ManifestError::MissingTool(_) => 3,
        ManifestError::ChecksumMismatch { .. } => 4,
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
    let settings = Settings::from_env(SettingsOverrides {
        root: cli.root,
        manifest: cli.manifest,
        skip_checksum: cli.skip_checksum,
    })?;
    let manifest = settings.open_manifest()?;
    let transport = SystemTransport::new()?;
    let mut app = App::new(manifest, transport);
    let json = cli.json;

    match cli.command {
        Commands::Add(args) => run_add(&mut app, args, json),
        Commands::Fetch(args) => run_fetch(&mut app, args, json),
        Commands::Search(args) => {
            let options = SearchOptions {
                alt: !args.names_only,
                partial: args.partial,
            };
            let result = app.search(&args.query, options);
            if json {
                JsonOutput::print_search(&result).into_diagnostic()?;
            } else {
                for dataset in &result.matches {
                    print_dataset_line(dataset);
                }
            }
            Ok(())
        }
        Commands::Path(args) => {
            let result = app.path(&args.name, args.extract.then_some(true))?;
            if json {
                JsonOutput::print_path(&result).into_diagnostic()?;
            } else {
                println!("{}", result.path);
            }
            Ok(())
        }
        Commands::List => {
            let result = app.list();
            if json {
                JsonOutput::print_list(&result).into_diagnostic()?;
            } else {
                println!("root: {}", result.root);
                for dataset in &result.datasets {
                    print_dataset_line(dataset);
                }
            }
            Ok(())
        }
        Commands::Info(args) => {
            let dataset = app.info(&args.name)?;
            print_dataset(&dataset, json)
        }
        Commands::Remove(args) => {
            let dataset = app.remove(&args.name)?;
            print_dataset(&dataset, json)
        }
    }
}

fn run_add(app: &mut App<SystemTransport>, args: AddArgs, json: bool) -> miette::Result<()> {
    let options = RegisterOptions {
        name: args.name,
        overwrite: args.overwrite,
        check_duplicate: !args.no_check_duplicate,
        entry: EntryOptions {
            version: args.version,
            branch: args.branch,
            doi: args.doi,
            aliases: args.aliases,
            key: args.key,
            sha256: args.sha256,
            skip_checksum: args.skip_entry_checksum,
            skip_download: args.skip_download,
            extract: args.extract,
            format: args.format,
        },
    };

    if args.fetch {
        let result = app.add_and_fetch(&args.uri, options)?;
        if json {
            JsonOutput::print_fetch(&result).into_diagnostic()?;
        } else {
            println!("{} -> {}", result.name, result.path);
        }
        return Ok(());
    }

    let dataset = app.add(&args.uri, options)?;
    print_dataset(&dataset, json)
}

fn run_fetch(app: &mut App<SystemTransport>, args: FetchArgs, json: bool) -> miette::Result<()> {
    let extract = if args.extract {
        Some(true)
    } else if args.no_extract {
        Some(false)
    } else {
        None
    };

    if args.names.len() == 1 {
        let result = app.fetch(&args.names[0], extract)?;
        if json {
            JsonOutput::print_fetch(&result).into_diagnostic()?;
        } else {
            println!("{}", result.path);
        }
        return Ok(());
    }

    let names = (!args.names.is_empty()).then_some(args.names.as_slice());
    let report = app.fetch_all(names);
    if json {
        JsonOutput::print_report(&report).into_diagnostic()?;
    } else {
        print_report(&report);
    }
    if report.is_success() {
        Ok(())
    } else {
        Err(miette::Report::msg(format!(
            "{} of {} datasets failed to fetch",
            report.failed.len(),
            report.failed.len() + report.fetched.len()
        )))
    }
}

fn print_dataset(dataset: &DatasetSummary, json: bool) -> miette::Result<()> {
    if json {
        return JsonOutput::print_dataset(dataset).into_diagnostic();
    }
    println!("name:    {}", dataset.name);
    println!("uri:     {}", dataset.uri);
    println!("kind:    {}", dataset.kind);
    println!("key:     {}", dataset.key);
    if let Some(version) = &dataset.version {
        println!("version: {version}");
    }
    if let Some(branch) = &dataset.branch {
        println!("branch:  {branch}");
    }
    if let Some(doi) = &dataset.doi {
        println!("doi:     {doi}");
    }
    if !dataset.aliases.is_empty() {
        println!("aliases: {}", dataset.aliases.join(", "));
    }
    if let Some(format) = &dataset.format {
        println!("format:  {format}{}", if dataset.extract { " (extract)" } else { "" });
    }
    if let Some(sha256) = &dataset.sha256 {
        println!("sha256:  {sha256}");
    }
    let state = if dataset.present { "present" } else { "missing" };
    println!("path:    {} ({state})", dataset.path);
    Ok(())
}

fn print_dataset_line(dataset: &DatasetSummary) {
    let marker = if dataset.present { "*" } else { " " };
    println!("{marker} {:<32} {}", dataset.name, dataset.uri);
}

fn print_report(report: &FetchReport) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    for item in &report.fetched {
        println!("{green}ok{reset}     {} -> {}", item.name, item.path);
    }
    for failure in &report.failed {
        println!("{red}failed{reset} {}: {}", failure.name, failure.error);
    }
    println!(
        "{} fetched, {} failed",
        report.fetched.len(),
        report.failed.len()
    );
}
