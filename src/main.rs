//! Stripestore CLI
//!
//! Opens an erasure-coded file store and serves commands from stdin.
//!
//! # Commands
//!
//! ```text
//! repairAll                      repair every file
//! clearCache                     drop read caches, refresh topology
//! repair <path>                  repair one file
//! put <path> <local file>        store a local file
//! get <path> <local file>        fetch a file to local disk
//! write <path> <offset> <text>   write text at an offset
//! cat <path>                     print a file
//! size <path>                    print a file's size
//! truncate <path> <size>         shrink a file
//! ls                             list files
//! stats                          print store and backend counters
//! quit                           flush and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stripestore::ec::CodeKind;
use stripestore::storage::SlotTagTable;
use stripestore::{
    AppConfig, FileEncoderDecoder, LocalDirBackend, MemoryBackend, ShardedMemoryBackend,
    StorageBackend,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Which backend to store blocks in
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Memory,
    Dir,
    Sharded,
}

/// Stripestore - erasure-coded virtual file store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override it
    #[arg(long, env = "STRIPESTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Erasure code
    #[arg(long, env = "STRIPESTORE_CODE", value_enum)]
    code: Option<CodeKind>,

    /// Data symbols per stripe
    #[arg(long, env = "STRIPESTORE_STRIPE_SIZE")]
    stripe_size: Option<usize>,

    /// Parity symbols per stripe
    #[arg(long, env = "STRIPESTORE_PARITY_SIZE")]
    parity_size: Option<usize>,

    /// Data symbols per local group (simple-regenerating)
    #[arg(long, env = "STRIPESTORE_LOCAL_DEGREE")]
    local_degree: Option<usize>,

    /// Storage backend
    #[arg(long, env = "STRIPESTORE_BACKEND", value_enum, default_value = "memory")]
    backend: BackendKind,

    /// Root directory of the dir backend
    #[arg(long, env = "STRIPESTORE_DATA_DIR", default_value = "./stripestore-data")]
    data_dir: PathBuf,

    /// Nodes of the sharded backend (defaults to one per stripe position)
    #[arg(long, env = "STRIPESTORE_SHARDS")]
    shards: Option<usize>,

    /// Slot tag table for the sharded backend, generated when absent
    #[arg(long, env = "STRIPESTORE_SLOT_TABLE")]
    slot_table: Option<PathBuf>,

    /// Containers kept in the read cache
    #[arg(long, env = "STRIPESTORE_CACHE_SIZE")]
    cache_size: Option<usize>,

    /// Backend call timeout in milliseconds
    #[arg(long, env = "STRIPESTORE_IO_TIMEOUT_MS")]
    io_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Configuration file (or defaults) with flag overrides applied
    async fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?,
            None => AppConfig::default(),
        };

        if let Some(kind) = self.code {
            config.code.kind = kind;
        }
        if let Some(stripe_size) = self.stripe_size {
            config.code.stripe_size = stripe_size;
        }
        if let Some(parity_size) = self.parity_size {
            config.code.parity_size = parity_size;
        }
        if let Some(local_degree) = self.local_degree {
            config.code.local_degree = local_degree;
        }
        if let Some(cache_size) = self.cache_size {
            config.store.cache_size = cache_size;
        }
        if let Some(io_timeout_ms) = self.io_timeout_ms {
            config.store.io_timeout_ms = io_timeout_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.app_config().await?;
    let code = config.code.build()?;

    info!("Starting stripestore");
    info!("  Code: {} {:?}", config.code.kind, code);
    info!("  Backend: {:?}", args.backend);

    let backend = open_backend(&args, code.total_size()).await?;
    let layer = FileEncoderDecoder::new(code, backend.clone(), config.store.clone()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Command::parse(line) {
            Some(Command::Quit) => break,
            Some(command) => match run_command(&layer, &backend, command).await {
                Ok(output) => {
                    if let Some(output) = output {
                        println!("{}", output);
                    }
                    println!("Done");
                }
                Err(e) => {
                    error!("Command failed: {:#}", e);
                    println!("Error: {:#}", e);
                }
            },
            None => println!("Unknown command"),
        }
    }

    layer.store().flush_all().await?;
    layer.disconnect().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn open_backend(args: &Args, total_size: usize) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match args.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Dir => Arc::new(
            LocalDirBackend::open(&args.data_dir)
                .await
                .with_context(|| format!("opening {}", args.data_dir.display()))?,
        ),
        BackendKind::Sharded => {
            let tags = match &args.slot_table {
                Some(path) => {
                    let file = std::fs::File::open(path)
                        .with_context(|| format!("opening {}", path.display()))?;
                    SlotTagTable::from_reader(std::io::BufReader::new(file))?
                }
                None => SlotTagTable::generate()?,
            };
            let shards = args.shards.unwrap_or(total_size);
            info!("  Shards: {}", shards);
            Arc::new(ShardedMemoryBackend::new(shards, total_size, Arc::new(tags))?)
        }
    };
    Ok(backend)
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    RepairAll,
    ClearCache,
    Repair(String),
    Put { path: String, local: PathBuf },
    Get { path: String, local: PathBuf },
    Write { path: String, offset: u64, text: String },
    Cat(String),
    Size(String),
    Truncate { path: String, size: u64 },
    Ls,
    Stats,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(2, char::is_whitespace);
        let name = parts.next()?;
        let rest = parts.next().unwrap_or("").trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match (name, args.as_slice()) {
            ("repairAll", []) => Command::RepairAll,
            ("clearCache", []) => Command::ClearCache,
            ("repair", [path]) => Command::Repair(path.to_string()),
            ("put", [path, local]) => Command::Put {
                path: path.to_string(),
                local: PathBuf::from(local),
            },
            ("get", [path, local]) => Command::Get {
                path: path.to_string(),
                local: PathBuf::from(local),
            },
            ("write", [path, offset, ..]) => {
                let offset = offset.parse().ok()?;
                // Text is everything after the offset, inner spacing included
                let text = rest
                    .split_once(char::is_whitespace)?
                    .1
                    .trim_start()
                    .split_once(char::is_whitespace)?
                    .1
                    .trim_start();
                Command::Write {
                    path: path.to_string(),
                    offset,
                    text: text.to_string(),
                }
            }
            ("cat", [path]) => Command::Cat(path.to_string()),
            ("size", [path]) => Command::Size(path.to_string()),
            ("truncate", [path, size]) => Command::Truncate {
                path: path.to_string(),
                size: size.parse().ok()?,
            },
            ("ls", []) => Command::Ls,
            ("stats", []) => Command::Stats,
            ("quit" | "exit", []) => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

async fn run_command(
    layer: &FileEncoderDecoder,
    backend: &Arc<dyn StorageBackend>,
    command: Command,
) -> anyhow::Result<Option<String>> {
    let output = match command {
        Command::RepairAll => {
            let summary = layer.repair_all_files().await?;
            let mut output = format!(
                "{} files checked, {} blocks restored",
                summary.repaired.len(),
                summary.blocks_restored()
            );
            for (path, reason) in &summary.failed {
                output.push_str(&format!("\nfailed {}: {}", path, reason));
            }
            Some(output)
        }
        Command::ClearCache => {
            layer.clear_read_cache().await?;
            None
        }
        Command::Repair(path) => {
            let report = layer.repair_file(&path).await?;
            Some(format!(
                "{} blocks restored in {} stripes",
                report.blocks_restored, report.stripes_repaired
            ))
        }
        Command::Put { path, local } => {
            let contents = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            layer.write_file(&path, 0, &contents).await?;
            Some(format!("{} bytes stored", contents.len()))
        }
        Command::Get { path, local } => {
            let contents = layer.read_to_end(&path).await?;
            tokio::fs::write(&local, &contents)
                .await
                .with_context(|| format!("writing {}", local.display()))?;
            Some(format!("{} bytes fetched", contents.len()))
        }
        Command::Write { path, offset, text } => {
            layer.write_file(&path, offset, text.as_bytes()).await?;
            None
        }
        Command::Cat(path) => {
            let contents = layer.read_to_end(&path).await?;
            Some(String::from_utf8_lossy(&contents).into_owned())
        }
        Command::Size(path) => Some(layer.size_of_file(&path).await?.to_string()),
        Command::Truncate { path, size } => {
            layer.truncate(&path, size).await?;
            None
        }
        Command::Ls => Some(layer.store().file_paths().await?.join("\n")),
        Command::Stats => {
            let backend = backend.clone();
            let stats = tokio::task::spawn_blocking(move || backend.stats()).await?;
            Some(format!(
                "{}\nbackend: {} containers, {} bytes, {} files, {} reads, {} writes",
                layer.store().metrics().snapshot(),
                stats.container_count,
                stats.total_bytes,
                stats.file_count,
                stats.reads,
                stats.writes
            ))
        }
        Command::Quit => None,
    };
    Ok(output)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries command replies, logs go to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("repairAll"), Some(Command::RepairAll));
        assert_eq!(Command::parse("clearCache"), Some(Command::ClearCache));
        assert_eq!(
            Command::parse("repair /a/b"),
            Some(Command::Repair("/a/b".to_string()))
        );
        assert_eq!(
            Command::parse("truncate f 12"),
            Some(Command::Truncate {
                path: "f".to_string(),
                size: 12
            })
        );
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_parse_write_keeps_spacing() {
        assert_eq!(
            Command::parse("write notes 4 hello  world"),
            Some(Command::Write {
                path: "notes".to_string(),
                offset: 4,
                text: "hello  world".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_commands() {
        assert_eq!(Command::parse("repairall"), None);
        assert_eq!(Command::parse("repair"), None);
        assert_eq!(Command::parse("truncate f x"), None);
        assert_eq!(Command::parse("write f"), None);
        assert_eq!(Command::parse("ls now"), None);
    }

    #[tokio::test]
    async fn test_run_commands() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let code = AppConfig::default().code.build().unwrap();
        let layer = FileEncoderDecoder::new(code, backend.clone(), Default::default())
            .await
            .unwrap();

        let write = Command::parse("write f 0 hello").unwrap();
        run_command(&layer, &backend, write).await.unwrap();

        let cat = run_command(&layer, &backend, Command::Cat("f".into()))
            .await
            .unwrap();
        assert_eq!(cat.as_deref(), Some("hello"));

        let repaired = run_command(&layer, &backend, Command::RepairAll)
            .await
            .unwrap()
            .unwrap();
        assert!(repaired.starts_with("1 files checked, 0 blocks restored"));

        let ls = run_command(&layer, &backend, Command::Ls).await.unwrap();
        assert_eq!(ls.as_deref(), Some("f"));
    }

    #[tokio::test]
    async fn test_stats_over_dir_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> =
            Arc::new(LocalDirBackend::open(dir.path()).await.unwrap());
        let code = AppConfig::default().code.build().unwrap();
        let layer = FileEncoderDecoder::new(code, backend.clone(), Default::default())
            .await
            .unwrap();

        let write = Command::parse("write f 0 hello").unwrap();
        run_command(&layer, &backend, write).await.unwrap();

        let stats = run_command(&layer, &backend, Command::Stats)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.contains("backend: 14 containers"), "{}", stats);
        assert!(stats.contains("1 files"), "{}", stats);
    }
}
