//! fixdedup - fixed-size segment deduplication
//!
//! Usage:
//!   fixdedup init                   - Write a config and create the index
//!   fixdedup encode <files>|--all   - Deduplicate files from the source dir
//!   fixdedup decode <files>|--all   - Rebuild files from reference sequences
//!   fixdedup verify <files>|--all   - Compare originals with rebuilt files
//!   fixdedup roundtrip [--ext .txt] [--runs N] [--segment-sizes ..] [--hashes ..]
//!                                   - Clear, encode, decode and verify; report means
//!   fixdedup stats                  - Show index and store statistics
//!   fixdedup clear                  - Drop the index and all encoded data

use clap::{Parser, Subcommand};
use fixdedup::{
    config::Config,
    hash::HashAlgorithm,
    report::{self, TrialMeans},
    workspace::Workspace,
    Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fixdedup")]
#[command(version)]
#[command(about = "Fixed-size segment deduplication")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/fixdedup/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file and initialize the content index
    Init {
        /// Data directory (defaults to the platform data dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Segment size in bytes
        #[arg(long)]
        segment_size: Option<usize>,

        /// Hash family: none, md5, sha1, sha256, sha512, blake3
        #[arg(long)]
        hash: Option<String>,
    },

    /// Deduplicate files from the source directory
    Encode {
        /// File names relative to the source directory
        files: Vec<String>,

        /// Encode every file in the source directory
        #[arg(long)]
        all: bool,
    },

    /// Rebuild files from their reference sequences
    Decode {
        /// Reference file names (`<name>.bin`) relative to the reference directory
        files: Vec<String>,

        /// Decode every reference file
        #[arg(long)]
        all: bool,
    },

    /// Count mismatched bytes between originals and rebuilt files
    Verify {
        /// Original file names
        files: Vec<String>,

        /// Verify every file in the source directory
        #[arg(long)]
        all: bool,
    },

    /// Clear, then encode, decode and verify source files and report statistics
    ///
    /// Destroys the index and all encoded data before every run.
    Roundtrip {
        /// Only use source files whose name ends with this suffix
        #[arg(long)]
        ext: Option<String>,

        /// Repeat each trial this many times and report the means
        #[arg(long, default_value_t = 1)]
        runs: usize,

        /// Segment sizes to sweep (defaults to the configured one)
        #[arg(long, value_delimiter = ',')]
        segment_sizes: Vec<usize>,

        /// Hash families to sweep (defaults to the configured one)
        #[arg(long, value_delimiter = ',')]
        hashes: Vec<String>,

        /// Append per-metric results under this directory
        #[arg(long)]
        results: Option<PathBuf>,
    },

    /// Show index and store statistics
    Stats,

    /// Drop the index and delete containers, references and rebuilt files
    Clear,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init {
            data_dir,
            segment_size,
            hash,
        } => cmd_init(config_path, data_dir, segment_size, hash),

        Commands::Encode { files, all } => cmd_encode(config_path, files, all),

        Commands::Decode { files, all } => cmd_decode(config_path, files, all),

        Commands::Verify { files, all } => cmd_verify(config_path, files, all),

        Commands::Roundtrip {
            ext,
            runs,
            segment_sizes,
            hashes,
            results,
        } => cmd_roundtrip(config_path, ext, runs, segment_sizes, hashes, results),

        Commands::Stats => cmd_stats(config_path),

        Commands::Clear => cmd_clear(config_path),
    }
}

/// Load the config file if present, otherwise defaults plus environment
fn load_config(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        Config::load(config_path)
    } else {
        Config::from_env()
    }
}

fn pick_files(files: Vec<String>, all: bool, available: Vec<String>) -> Result<Vec<String>> {
    let files = if all { available } else { files };
    if files.is_empty() {
        return Err(Error::InvalidConfig(
            "No files given (pass names or --all)".to_string(),
        ));
    }
    Ok(files)
}

fn cmd_init(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    segment_size: Option<usize>,
    hash: Option<String>,
) -> Result<()> {
    info!("Initializing fixdedup...");

    // Flags win over the environment
    let mut config = Config::from_env()?;
    if let Some(dir) = data_dir {
        config.rebase(expand_tilde(&dir));
    }
    if let Some(size) = segment_size {
        config.dedup.segment_size = size;
    }
    if let Some(hash) = hash {
        config.dedup.hash = hash.parse()?;
    }
    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;

    let workspace = Workspace::open(config)?;
    workspace.initialize()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Data directory: {:?}", workspace.config().data_dir);
    info!("Put files to deduplicate in {:?}", workspace.config().paths.source_dir);

    workspace.close()
}

fn cmd_encode(config_path: &Path, files: Vec<String>, all: bool) -> Result<()> {
    let workspace = Workspace::open(load_config(config_path)?)?;
    let files = pick_files(files, all, workspace.source_files()?)?;

    let dedup = workspace.deduplicator()?;
    let paths = &workspace.config().paths;
    for file in &files {
        dedup.encode_file(paths, file)?;
    }

    workspace.close()
}

fn cmd_decode(config_path: &Path, files: Vec<String>, all: bool) -> Result<()> {
    let workspace = Workspace::open(load_config(config_path)?)?;
    let files = pick_files(files, all, workspace.reference_files()?)?;

    let dup = workspace.duplicator()?;
    let paths = &workspace.config().paths;
    for file in &files {
        dup.decode_file(paths, file)?;
    }

    workspace.close()
}

fn cmd_verify(config_path: &Path, files: Vec<String>, all: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let workspace = Workspace::open(config)?;
    let files = pick_files(files, all, workspace.source_files()?)?;

    let paths = &workspace.config().paths;
    let mut total_errors = 0;
    for file in &files {
        let errors =
            report::file_byte_errors(&paths.source_dir.join(file), &paths.output_dir.join(file))?;
        println!("{}: {} byte error(s)", file, errors);
        total_errors += errors;
    }
    println!("Total byte errors: {}", total_errors);

    workspace.close()
}

fn cmd_roundtrip(
    config_path: &Path,
    ext: Option<String>,
    runs: usize,
    segment_sizes: Vec<usize>,
    hashes: Vec<String>,
    results: Option<PathBuf>,
) -> Result<()> {
    if runs == 0 {
        return Err(Error::InvalidConfig("--runs must be at least 1".to_string()));
    }
    let base = load_config(config_path)?;

    // Results are grouped by the axis being swept
    let axis = match (segment_sizes.is_empty(), hashes.is_empty()) {
        (false, true) => "size",
        (true, false) => "hash",
        (false, false) => "size_hash",
        (true, true) => "type",
    };
    let sizes = if segment_sizes.is_empty() {
        vec![base.dedup.segment_size]
    } else {
        segment_sizes
    };
    let hashes = if hashes.is_empty() {
        vec![base.dedup.hash]
    } else {
        hashes
            .iter()
            .map(|h| h.parse())
            .collect::<Result<Vec<HashAlgorithm>>>()?
    };

    for &segment_size in &sizes {
        for &hash in &hashes {
            let mut config = base.clone();
            config.dedup.segment_size = segment_size;
            config.dedup.hash = hash;

            let label = match axis {
                "size" => segment_size.to_string(),
                "hash" => hash.to_string(),
                "size_hash" => format!("{}-{}", segment_size, hash),
                _ => ext.clone().unwrap_or_else(|| "all".to_string()),
            };

            let workspace = Workspace::open(config)?;
            let mut summaries = Vec::with_capacity(runs);
            for run in 1..=runs {
                info!("Trial {} run {}/{}", label, run, runs);
                let summary = workspace.run_batch(ext.as_deref())?;
                summary.log();
                summaries.push(summary);
            }
            workspace.clear()?;
            workspace.close()?;

            let means = TrialMeans::from_runs(&summaries);
            means.log(&label);
            if let Some(dir) = &results {
                means.append_to(&expand_tilde(dir).join(axis), &label)?;
            }
        }
    }
    Ok(())
}

fn cmd_stats(config_path: &Path) -> Result<()> {
    let workspace = Workspace::open(load_config(config_path)?)?;
    let config = workspace.config();
    let stats = workspace.stats()?;

    println!("fixdedup Status");
    println!("===============");
    println!();
    println!("Configuration: {:?}", config_path);
    println!("Data directory: {:?}", config.data_dir);
    println!("Segment size: {} bytes", config.dedup.segment_size);
    println!("Container capacity: {} segments", config.dedup.container_capacity);
    println!("Id width: {} bytes (max id {})", config.dedup.id_width, config.dedup.max_id());
    println!("Hash: {}", config.dedup.hash);
    println!();
    println!(
        "Index: {}",
        if stats.index_initialized { "initialized" } else { "not initialized" }
    );
    println!("Index entries: {}", stats.index_entries);
    println!("Segments seen: {}", stats.total_occurrences);
    println!("Containers: {} ({} bytes)", stats.containers, stats.container_bytes);
    println!("Reference files: {} bytes", stats.reference_bytes);
    println!("Source files: {} bytes", stats.source_bytes);
    println!("Compression ratio: {:.4}", stats.compression_ratio());

    workspace.close()
}

fn cmd_clear(config_path: &Path) -> Result<()> {
    let workspace = Workspace::open(load_config(config_path)?)?;
    info!("Clearing index and encoded data...");
    workspace.clear()?;
    workspace.close()
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
