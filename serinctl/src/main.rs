use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use directories::BaseDirs;
use rustyline::{error::ReadlineError, DefaultEditor};
use serin_shard::{bucket_for, BucketRouter, RouteDecision, WriteRoute};
use serin_topology::{ShardingConfig, Topology, TopologyChange, TopologyStore};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::Level;

/// SerinDB shard routing tool.
#[derive(Parser)]
#[command(name = "serinctl", author, version, about = "SerinDB shard routing CLI", long_about = None)]
struct Cli {
    #[command(flatten)]
    opts: Options,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct Options {
    /// Path to configuration file (default: $HOME/.serinrc).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Write JSON logs to this directory instead of stderr.
    #[arg(long = "log-dir", global = true)]
    log_dir: Option<String>,
}

#[derive(Args)]
struct TopologyArg {
    /// Topology file (JSON, or YAML with a .yaml/.yml extension).
    #[arg(long)]
    topology: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Route keys to their shards.
    Route {
        #[command(flatten)]
        topology: TopologyArg,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Print the bucket of each key.
    Bucket {
        /// Topology whose bucket space must match the configured one.
        #[arg(long)]
        topology: Option<PathBuf>,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Inspect topology files.
    Topology {
        #[command(subcommand)]
        action: TopologyAction,
    },

    /// Route keys interactively.
    Shell {
        #[command(flatten)]
        topology: TopologyArg,
    },
}

#[derive(Subcommand)]
enum TopologyAction {
    /// Print ranges, shards and migrations.
    Show {
        #[command(flatten)]
        topology: TopologyArg,
        /// Print the topology as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check that a topology file is well formed.
    Validate {
        #[command(flatten)]
        topology: TopologyArg,
    },
    /// Tell whether a client holding `client_version` must refresh.
    Changed {
        #[command(flatten)]
        topology: TopologyArg,
        #[arg(long)]
        client_version: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = match &cli.opts.log_dir {
        Some(dir) => Some(serin_log::init(dir, Level::INFO)?),
        None => {
            serin_log::init_stdout("warn")?;
            None
        }
    };
    let config = load_config(cli.opts.config)?;

    match cli.command {
        Commands::Route { topology, keys } => {
            let router = router(&topology.topology, &config)?;
            for key in &keys {
                println!("{}", route_line(&router, key));
            }
        }
        Commands::Bucket { topology, keys } => {
            for line in bucket_lines(topology.as_deref(), &config, &keys)? {
                println!("{line}");
            }
        }
        Commands::Topology { action } => match action {
            TopologyAction::Show { topology, json } => {
                let topology = load_topology(&topology.topology)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&topology)?);
                } else {
                    print!("{}", describe(&topology));
                }
            }
            TopologyAction::Validate { topology } => {
                let loaded = load_topology(&topology.topology)?;
                println!("{} is valid (version {}, {} shards)", topology.topology.display(), loaded.version(), loaded.shard_count());
            }
            TopologyAction::Changed { topology, client_version } => {
                let store = TopologyStore::new(load_topology(&topology.topology)?);
                match store.check_client(client_version) {
                    TopologyChange::Current => println!("current (version {})", store.version()),
                    TopologyChange::Refresh { current_version } => {
                        println!("changed: refresh to version {current_version}");
                    }
                }
            }
        },
        Commands::Shell { topology } => {
            let router = router(&topology.topology, &config)?;
            interactive_shell(&router)?;
        }
    }
    Ok(())
}

/// Explicit `--config` must exist; the default `~/.serinrc` is optional.
fn load_config(explicit: Option<PathBuf>) -> Result<ShardingConfig> {
    if let Some(path) = explicit {
        return ShardingConfig::load(&path).with_context(|| format!("loading config {}", path.display()));
    }
    match BaseDirs::new().map(|b| b.home_dir().join(".serinrc")) {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "loaded config");
            ShardingConfig::load(&path).with_context(|| format!("loading config {}", path.display()))
        }
        _ => Ok(ShardingConfig::default()),
    }
}

fn load_topology(path: &Path) -> Result<Topology> {
    Topology::load(path).with_context(|| format!("loading topology {}", path.display()))
}

fn router(path: &Path, config: &ShardingConfig) -> Result<BucketRouter> {
    let store = Arc::new(TopologyStore::new(load_topology(path)?));
    BucketRouter::new(store, config).with_context(|| format!("routing with topology {}", path.display()))
}

fn bucket_lines(topology: Option<&Path>, config: &ShardingConfig, keys: &[String]) -> Result<Vec<String>> {
    if let Some(path) = topology {
        router(path, config)?;
    }
    Ok(keys
        .iter()
        .map(|key| match bucket_for(key, config.separator, config.bucket_space) {
            Ok(bucket) => format!("{key}\tbucket={bucket}"),
            Err(e) => format!("{key}\terror={e}"),
        })
        .collect())
}

fn route_line(router: &BucketRouter, key: &str) -> String {
    match router.decide(key) {
        Ok(decision) => format!("{key}\t{}", describe_decision(&decision)),
        Err(e) => format!("{key}\terror={e}"),
    }
}

fn describe_decision(d: &RouteDecision) -> String {
    let write = match d.write {
        WriteRoute::Single(shard) => shard.to_string(),
        WriteRoute::Dual { primary, secondary } => format!("{primary}+{secondary}"),
        WriteRoute::Blocked(_) => "blocked".to_string(),
    };
    let mut line = format!("bucket={} read={} write={} version={}", d.bucket, d.read_shard, write, d.topology_version);
    if let Some(m) = d.migration {
        line.push_str(&format!(" migrating={}->{}", m.source_shard, m.destination_shard));
    }
    line
}

fn describe(topology: &Topology) -> String {
    let mut out = format!("version {} bucket_space {}\n", topology.version(), topology.bucket_space());
    for shard in topology.all_shards() {
        let ranges: Vec<String> = topology.buckets_owned_by(shard).iter().map(|(start, end)| format!("[{start}, {end})")).collect();
        let ranges = if ranges.is_empty() { "no buckets".to_string() } else { ranges.join(" ") };
        out.push_str(&format!("shard {shard}: {ranges}\n"));
    }
    for m in topology.migrations() {
        out.push_str(&format!("bucket {}: {} -> {} ({:?})\n", m.bucket, m.source_shard, m.destination_shard, m.status));
    }
    out
}

/// Interactive readline shell; each line is a key to route.
fn interactive_shell(router: &BucketRouter) -> Result<()> {
    let mut rl = DefaultEditor::new().context("failed to init editor")?;
    let prompt = "serinctl> ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq("\\q") {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;
                println!("{}", route_line(router, trimmed));
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }
    Ok(())
}
