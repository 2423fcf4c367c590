use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::EnvFilter;

use test262_harness::fs::ensure_archive;
use test262_harness::{CorpusStream, ExclusionEngine, HarnessConfig, HarnessError, TestCase};

#[derive(Parser, Debug)]
#[command(name = "test262-harness")]
#[command(about = "Inspect a Test262 corpus: list cases, fetch revisions, check exclusions")]
struct Args {
    /// Path to a TOML config file (defaults to ./test262_harness.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a test262 checkout (overrides the config file)
    #[arg(short, long)]
    test_dir: Option<PathBuf>,

    /// Path to a zip archive of test262 (overrides the config file)
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Top-level folder inside the archive
    #[arg(long)]
    archive_root: Option<String>,

    /// test262 commit to download (overrides the config file)
    #[arg(long)]
    commit: Option<String>,

    /// Only walk these folders under test/ (repeatable)
    #[arg(short = 'd', long = "subdir")]
    sub_directories: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List test cases, including strict-mode variants
    List {
        /// Only show cases matched by exclusion rules, with the reason
        #[arg(long)]
        excluded: bool,

        /// Only show cases whose path contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Download (or validate the cached copy of) a test262 revision
    Fetch,
    /// List harness helper files
    Harness,
    /// Print exclusion entries that name no file in the corpus
    Unrecognized,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, HarnessError> {
    let mut config = HarnessConfig::load_or_default(args.config.as_deref());
    if let Some(test_dir) = args.test_dir {
        config.test262_path = Some(test_dir);
    }
    if let Some(archive) = args.archive {
        config.test262_path = None;
        config.test262_archive = Some(archive);
    }
    if let Some(root) = args.archive_root {
        config.archive_root = root;
    }
    if let Some(commit) = args.commit {
        config.test262_path = None;
        config.test262_archive = None;
        config.test262_commit = Some(commit);
    }
    if !args.sub_directories.is_empty() {
        config.sub_directories = args.sub_directories;
    }

    match args.command {
        Command::Fetch => fetch(&config),
        Command::List { excluded, filter } => list(&config, excluded, filter.as_deref()),
        Command::Harness => harness(&config),
        Command::Unrecognized => unrecognized(&config),
    }
}

fn open_stream(config: &HarnessConfig) -> Result<CorpusStream, HarnessError> {
    let fs = config.open_file_system()?;
    println!("{}", "Test262 Harness".bold().cyan());
    println!("Source: {}", fs.describe());
    CorpusStream::new(fs, config.stream_options())
}

fn fetch(config: &HarnessConfig) -> Result<ExitCode, HarnessError> {
    let Some(commit) = &config.test262_commit else {
        return Err(HarnessError::InvalidArgument(
            "fetch needs --commit or test262_commit in the config file".to_string(),
        ));
    };
    let options = config.remote_options(commit);
    let path = ensure_archive(&options)?;
    println!("{} {}", "Archive ready:".green(), path.display());
    if options.extract {
        let fs = test262_harness::fs::open_corpus(&options)?;
        println!("{} {}", "Extracted:".green(), fs.describe());
    }
    Ok(ExitCode::SUCCESS)
}

fn list(
    config: &HarnessConfig,
    excluded_only: bool,
    filter: Option<&str>,
) -> Result<ExitCode, HarnessError> {
    let stream = open_stream(config)?;
    let exclusions = config.exclusion_engine()?;

    let mut total = 0;
    let mut errors = 0;
    for item in stream.enumerate() {
        let case = match item {
            Ok(case) => case,
            Err(e) if !e.is_per_file() => return Err(e),
            Err(e) => {
                errors += 1;
                eprintln!("{}: {}", "SKIP".yellow(), e);
                continue;
            }
        };
        if filter.is_some_and(|f| !case.file_name().contains(f)) {
            continue;
        }

        if excluded_only {
            if let Some(reason) = exclusions.resolve(&case) {
                total += 1;
                println!("{} {}", case, format!("[{}]", reason).dimmed());
            }
        } else {
            total += 1;
            println!("{}", case);
        }
    }

    println!("\nTotal: {} cases", total);
    if errors > 0 {
        println!("{} {} files could not be read", "Warning:".yellow(), errors);
    }
    Ok(ExitCode::SUCCESS)
}

fn harness(config: &HarnessConfig) -> Result<ExitCode, HarnessError> {
    let stream = open_stream(config)?;
    let files = stream.harness_files()?;
    for file in &files {
        let includes = if file.includes().is_empty() {
            String::new()
        } else {
            format!(" (includes {})", file.includes().join(", "))
        };
        println!("{}{}", file.file_name().bold(), includes);
        if !file.description().is_empty() {
            println!("  {}", file.description().trim());
        }
    }
    println!("\nTotal: {} harness files", files.len());
    Ok(ExitCode::SUCCESS)
}

fn unrecognized(config: &HarnessConfig) -> Result<ExitCode, HarnessError> {
    let stream = open_stream(config)?;
    let exclusions: ExclusionEngine = config.exclusion_engine()?;
    let cases: Vec<TestCase> = stream.test_cases().collect();
    let missing = exclusions.unrecognized(&cases);

    if missing.is_empty() {
        println!("{}", "All exclusion entries match a test file".green());
        return Ok(ExitCode::SUCCESS);
    }

    println!("\n{}", "=== Unrecognized exclusions ===".bold().yellow());
    for entry in &missing {
        println!("  {}", entry);
    }
    println!("\nTotal: {} entries", missing.len());
    // Drift is reported, not treated as a failure
    Ok(ExitCode::SUCCESS)
}
