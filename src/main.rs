//! readxbrl CLI - XBRL filing import and inline report extraction

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use readxbrl::{
    service::messages, ApiResponse, Config, FactExtractor, InlineFact, InstanceImporter, ReportRequest,
    ReportService, SchemaCache, SqliteStore, TaxonomyResolver,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// XBRL filing import and inline XBRL report extraction
#[derive(ClapParser)]
#[command(name = "readxbrl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database (overrides DB_DSN)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a filing archive holding instance.xbrl and Taxonomy.xsd
    Import {
        /// Filing archive
        #[arg(long)]
        zip: PathBuf,

        /// Taxonomy cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// SQL file to bootstrap the database with
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Keep the unpacked archive
        #[arg(long)]
        keep_temp: bool,
    },

    /// Import an inline XBRL report archive for a company period
    Inline {
        /// Report archive (.zip)
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        ticker: String,

        /// Company name
        #[arg(long)]
        name: String,

        #[arg(long)]
        year: String,

        #[arg(long)]
        quarter: String,

        /// Output the response envelope as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show a stored report
    Report {
        #[arg(long)]
        ticker: String,

        #[arg(long)]
        year: String,

        #[arg(long)]
        quarter: String,

        /// Output the response envelope as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List stored reports
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Extract facts from report archives without storing them
    Facts {
        /// Report archives
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match run(cli.command, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded
fn run(command: Commands, mut config: Config) -> Result<bool> {
    match command {
        Commands::Import {
            zip,
            cache_dir,
            schema,
            keep_temp,
        } => {
            if let Some(dir) = cache_dir {
                config.cache_dir = dir;
            }
            if schema.is_some() {
                config.schema_path = schema;
            }

            let start = Instant::now();
            let store = open_store(&config)?;
            let resolver = TaxonomyResolver::with_http(SchemaCache::new(&config.cache_dir))?
                .with_timeout(config.fetch_timeout);
            let summary = InstanceImporter::new(&store, resolver)
                .keep_temp(keep_temp)
                .import(&zip)
                .with_context(|| format!("Failed to import {}", zip.display()))?;

            println!("{} {}", "✓".green().bold(), zip.display());
            println!("  Document: {} (id {})", summary.document_name, summary.document_id);
            println!("  Schemas: {}", summary.schemas);
            println!(
                "  Concepts: {} ({} from facts only)",
                summary.concepts, summary.missing_concepts
            );
            println!("  Contexts: {}", summary.contexts);
            println!("  Units: {}", summary.units);
            println!("  Facts: {}", summary.facts);
            if let Some(dir) = &summary.kept_dir {
                println!("  Kept: {}", dir.display());
            }
            println!("  Time: {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
            Ok(true)
        }

        Commands::Inline {
            file,
            ticker,
            name,
            year,
            quarter,
            json,
        } => {
            let store = open_store(&config)?;
            let service = ReportService::new(&store, &config.storage_dir);
            let request = ReportRequest {
                ticker,
                company_name: name,
                year,
                quarter,
                archive: file,
                original_filename: None,
            };
            let response = ApiResponse::from_result(service.import_report(&request), Some(messages::IMPORTED));

            if json {
                println!("{}", response.to_json()?);
            } else if let Some(report) = &response.data {
                println!(
                    "{} {} {} Q{}",
                    "✓".green().bold(),
                    report.company.ticker,
                    report.fiscal_year,
                    report.fiscal_quarter
                );
                println!("  Company: {}", report.company.name);
                println!("  Lines: {}", report.line_count);
                println!("  Stored as: {}", report.source_file);
            } else {
                print_failure(&response);
            }
            Ok(response.is_success())
        }

        Commands::Report {
            ticker,
            year,
            quarter,
            json,
        } => {
            let store = open_store(&config)?;
            let service = ReportService::new(&store, &config.storage_dir);
            let response = ApiResponse::from_result(service.get_report(&ticker, &year, &quarter), None);

            if json {
                println!("{}", response.to_json()?);
            } else if let Some(report) = &response.data {
                println!(
                    "{} - {} {} Q{}",
                    report.company.ticker.bold(),
                    report.company.name,
                    report.fiscal_year,
                    report.fiscal_quarter
                );
                if let Some(source) = &report.source_file {
                    println!("  Source: {}", source);
                }
                print_lines(&report.lines);
            } else {
                print_failure(&response);
            }
            Ok(response.is_success())
        }

        Commands::List { json } => {
            let store = open_store(&config)?;
            let reports = ReportService::new(&store, &config.storage_dir).list_reports()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if reports.is_empty() {
                println!("No reports stored");
            } else {
                for report in &reports {
                    println!(
                        "  {:<10} {} Q{}  {:>5} lines  {}",
                        report.company.ticker,
                        report.fiscal_year,
                        report.fiscal_quarter,
                        report.line_count,
                        report.company.name
                    );
                }
            }
            Ok(true)
        }

        Commands::Facts { archives, json } => {
            let extractor = FactExtractor::new();
            let results = extract_all(&extractor, &archives);

            let mut ok = true;
            for (path, result) in archives.iter().zip(results) {
                match result {
                    Ok(facts) if json => {
                        println!("{}", serde_json::to_string_pretty(&facts)?);
                    }
                    Ok(facts) => {
                        println!("{} {} ({} facts)", "✓".green().bold(), path.display(), facts.len());
                        print_lines(&facts);
                    }
                    Err(e) => {
                        ok = false;
                        eprintln!("{} {}: {}", "✗".red().bold(), path.display(), e);
                    }
                }
            }
            Ok(ok)
        }
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    let store = match &config.schema_path {
        Some(schema) => {
            let sql = std::fs::read_to_string(schema)
                .with_context(|| format!("Failed to read schema {}", schema.display()))?;
            SqliteStore::open_with_schema(&config.database_path, &sql)
        }
        None => SqliteStore::open(&config.database_path),
    };
    store.with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

#[cfg(feature = "parallel")]
fn extract_all(extractor: &FactExtractor, archives: &[PathBuf]) -> Vec<readxbrl::Result<Vec<InlineFact>>> {
    use rayon::prelude::*;

    archives
        .par_iter()
        .map(|path| extractor.extract_file(path))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn extract_all(extractor: &FactExtractor, archives: &[PathBuf]) -> Vec<readxbrl::Result<Vec<InlineFact>>> {
    archives.iter().map(|path| extractor.extract_file(path)).collect()
}

fn print_lines(lines: &[InlineFact]) {
    for line in lines {
        println!("  {:<60} {:>20} {}", line.line_item, line.value, line.unit);
    }
}

fn print_failure<T: serde::Serialize>(response: &ApiResponse<T>) {
    let message = response.message.as_deref().unwrap_or_default();
    eprintln!("{} {}", "✗".red().bold(), message);
}
