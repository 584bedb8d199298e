use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadastre_merger::app::{
    App, AppOptions, CategoryStatus, ProgressSinkKind, RunReport, RunRequest, TerritoryStatus,
};
use cadastre_merger::catalog::{CatalogClient, CkanHttpClient};
use cadastre_merger::config::{ConfigLoader, ResolvedConfig};
use cadastre_merger::domain::Category;
use cadastre_merger::error::CadastreError;
use cadastre_merger::fetch::{ArchiveClient, ArchiveHttpClient};
use cadastre_merger::output::{JsonOutput, OutputMode};
use cadastre_merger::store::Store;
use cadastre_merger::tui::Tui;

#[derive(Parser)]
#[command(name = "cadastre-merge")]
#[command(about = "Merge Latvian cadastral parcel and building shapefiles across territories")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file (defaults to ./cadastre-merge.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Ignore the cached catalog and fetch it again
    #[arg(long, global = true)]
    refresh: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List territories available in the catalog")]
    Territories,
    #[command(about = "Download, merge and package the selected territories")]
    Merge(MergeArgs),
    #[command(about = "Manage the local catalog cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct MergeArgs {
    /// Territory name as listed by `territories`; repeatable
    #[arg(long = "territory")]
    territories: Vec<String>,

    /// Select every territory in the catalog
    #[arg(long)]
    all: bool,

    /// Data category to merge; repeatable, defaults to parcel
    #[arg(long = "category", value_enum)]
    categories: Vec<Category>,

    /// Where to write the merged zip
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Delete the cached catalog")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CadastreError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CadastreError) -> u8 {
    match error {
        CadastreError::InvalidCategory(_)
        | CadastreError::NoTerritoriesSelected
        | CadastreError::NoCategoriesSelected
        | CadastreError::UnknownTerritory(_)
        | CadastreError::NoDataFound
        | CadastreError::ConfigRead(_)
        | CadastreError::ConfigParse(_)
        | CadastreError::InvalidConfig(_) => 2,
        CadastreError::CatalogHttp(_)
        | CadastreError::CatalogStatus { .. }
        | CadastreError::CatalogParse(_)
        | CadastreError::CatalogRejected
        | CadastreError::EmptyCatalog
        | CadastreError::DownloadHttp(_)
        | CadastreError::DownloadStatus { .. } => 3,
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

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(&config)?;

    match cli.command {
        Some(Commands::Territories) => run_territories(&app, cli.refresh, output_mode),
        Some(Commands::Merge(args)) => run_merge(app, &config, args, cli.refresh, output_mode),
        Some(Commands::Cache(CacheArgs {
            command: CacheCommand::Clear,
        })) => run_clear(&app, output_mode),
        None => match output_mode {
            OutputMode::Interactive => run_interactive(app, &config, cli.refresh),
            OutputMode::NonInteractive => Err(miette::Report::msg(
                "command required (try `cadastre-merge merge --help`)",
            )),
        },
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<App<CkanHttpClient, ArchiveHttpClient>> {
    let store = Store::new()?;
    let catalog = CkanHttpClient::new(config)?;
    let archives = ArchiveHttpClient::new(config)?;
    let options = AppOptions {
        catalog_cache: config.catalog_cache,
        work_dir: config.work_dir.clone(),
    };
    Ok(App::new(store, catalog, archives, options))
}

fn run_territories<C: CatalogClient, A: ArchiveClient>(
    app: &App<C, A>,
    refresh: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let result = app.list(refresh, &JsonOutput)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_list(&result).map_err(io_report)?,
        OutputMode::Interactive => {
            for entry in &result.territories {
                println!("{}", entry.name);
            }
        }
    }
    Ok(())
}

fn run_clear<C: CatalogClient, A: ArchiveClient>(
    app: &App<C, A>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let result = app.clear_cache(&JsonOutput)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_clear(&result).map_err(io_report)?,
        OutputMode::Interactive if result.cleared => println!("catalog cache cleared"),
        OutputMode::Interactive => println!("catalog cache was already empty"),
    }
    Ok(())
}

fn run_merge<C, A>(
    app: App<C, A>,
    config: &ResolvedConfig,
    args: MergeArgs,
    refresh: bool,
    output_mode: OutputMode,
) -> miette::Result<()>
where
    C: CatalogClient + Clone + 'static,
    A: ArchiveClient + Clone + 'static,
{
    let MergeArgs {
        territories,
        all,
        categories,
        output,
    } = args;
    let output = output.unwrap_or_else(|| config.output.clone());
    let categories = if categories.is_empty() {
        vec![Category::Parcel]
    } else {
        categories
    };

    let catalog = app.load_catalog(refresh, &JsonOutput);
    if catalog.is_empty() {
        return Err(CadastreError::EmptyCatalog.into());
    }
    let territories = if all {
        catalog.sorted_names()
    } else {
        territories
    };
    let request = RunRequest::new(territories, categories);
    request.validate(&catalog)?;

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.run(&catalog, &request, &JsonOutput)?;
            JsonOutput::print_run(&result.report).map_err(io_report)?;
            write_archive(&output, result.into_archive()?)
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Run);
            let result = tui.run(move |sink| app.run(&catalog, &request, sink))?;
            let report = result.report.clone();
            write_archive(&output, result.into_archive()?)?;
            print_run_summary(&report, &output);
            Ok(())
        }
    }
}

fn run_interactive<C, A>(
    app: App<C, A>,
    config: &ResolvedConfig,
    refresh: bool,
) -> miette::Result<()>
where
    C: CatalogClient + Clone + 'static,
    A: ArchiveClient + Clone + 'static,
{
    let loader = app.clone();
    let mut loading = Tui::new(ProgressSinkKind::Catalog);
    let catalog = loading.run(move |sink| Ok(loader.load_catalog(refresh, sink)))?;
    if catalog.is_empty() {
        return Err(CadastreError::EmptyCatalog.into());
    }

    let mut tui = Tui::new(ProgressSinkKind::Run);
    let Some(request) = tui.select(catalog.clone())? else {
        return Ok(());
    };

    let result = tui.run(move |sink| app.run(&catalog, &request, sink))?;
    let report = result.report.clone();
    let archive = result.into_archive()?;
    write_archive(&config.output, archive)?;
    tui.finish_run(&report, &config.output.display().to_string())?;
    print_run_summary(&report, &config.output);
    Ok(())
}

fn write_archive(output: &Path, archive: Vec<u8>) -> miette::Result<()> {
    let path = Utf8PathBuf::from_path_buf(output.to_path_buf()).map_err(|path| {
        miette::Report::msg(format!("output path is not valid UTF-8: {}", path.display()))
    })?;
    Store::write_bytes_atomic(&path, &archive)?;
    tracing::info!(path = %path, bytes = archive.len(), "wrote merged archive");
    Ok(())
}

fn print_run_summary(report: &RunReport, output: &Path) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}cadastre-merge summary{reset}");
    println!(
        "{green}territories processed: {}{reset}",
        report.territories.len() - report.skipped_territories()
    );
    for territory in &report.territories {
        if let TerritoryStatus::Skipped { reason } = &territory.status {
            println!("{yellow}  skipped {}: {reason}{reset}", territory.name);
        }
    }
    for category in &report.categories {
        match &category.status {
            CategoryStatus::Merged {
                inputs,
                inputs_merged,
                records_written,
                null_geometries,
                skipped,
            } => {
                println!(
                    "{green}{}: {records_written} records from {inputs_merged}/{inputs} files{reset}",
                    category.base_name
                );
                if *null_geometries > 0 {
                    println!("{yellow}  dropped {null_geometries} null geometries{reset}");
                }
                for input in skipped {
                    println!(
                        "{yellow}  skipped {}: {}{reset}",
                        input.path.display(),
                        input.reason
                    );
                }
            }
            CategoryStatus::NoInputs => {
                println!("{yellow}{}: no matching files{reset}", category.base_name)
            }
            CategoryStatus::Failed { reason } => {
                println!("{yellow}{}: {reason}{reset}", category.base_name)
            }
        }
    }
    println!("{cyan}archive: {}{reset}", output.display());
}

fn io_report(err: std::io::Error) -> miette::Report {
    miette::Report::msg(err.to_string())
}
