// veilroute: fragment routing simulator
//
// Drives the routing core against in-process collaborators: a static relay
// directory, an in-memory ledger and a memory or sled plan store.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use veilroute_core::services::PlanStore;
use veilroute_core::{
    split_amount, Amount, AnonymityMetrics, BackendPlanStore, Fragment, LoggingFailureHandler,
    MemoryLedger, MemoryStorage, Relay, RelayUsageMetrics, RoutingEngine, SecurityPolicy,
    SledStorage, StaticDirectory,
};

use config::Config;

#[derive(Parser)]
#[command(name = "veilroute")]
#[command(about = "Veilroute: anonymous fragment routing", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split an amount into fragments and route them
    Route {
        #[arg(short = 'n', long, default_value = "4")]
        count: usize,
        #[arg(short, long)]
        amount: String,
        /// Fragments routed at once
        #[arg(short, long, default_value = "4")]
        parallel: usize,
    },
    /// Run the splitter alone
    Split {
        #[arg(short, long)]
        amount: String,
        #[arg(short, long, default_value = "4")]
        parts: usize,
    },
    /// Inspect or validate a security policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// List eligible relays from the configured pool
    Relays {
        /// Include ineligible relays
        #[arg(short, long)]
        all: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Print the configured policy as JSON
    Show,
    /// Validate a policy file
    Check { file: PathBuf },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[derive(Serialize)]
struct FragmentSummary<'a> {
    id: &'a str,
    amount: String,
    routed: bool,
    remix_count: u32,
    metadata_hash: Option<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Route {
            count,
            amount,
            parallel,
        } => cmd_route(cli.config, count, &amount, parallel).await,
        Commands::Split { amount, parts } => cmd_split(&amount, parts),
        Commands::Policy { action } => cmd_policy(cli.config, action),
        Commands::Relays { all } => cmd_relays(cli.config, all),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

async fn cmd_route(
    config_path: Option<PathBuf>,
    count: usize,
    amount: &str,
    parallel: usize,
) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let total = parse_amount(amount)?;
    let parts = split_amount(total, count).context("Failed to split amount")?;

    let relays = relay_pool(&config)?;
    let relay_count = relays.len();
    let ledger = Arc::new(MemoryLedger::new(config.start_block_height));
    let metrics = Arc::new(RelayUsageMetrics::new());
    let failures = Arc::new(LoggingFailureHandler::new(config.policy.max_retries));
    let engine = RoutingEngine::new(
        config.policy.clone(),
        Arc::new(StaticDirectory::new(relays)),
        plan_store(&config)?,
        ledger.clone(),
        failures.clone(),
    )
    .context("Failed to build routing engine")?
    .with_metrics(metrics.clone());
    info!(
        "Routing engine ready: {} relays, block height {}",
        relay_count, config.start_block_height
    );

    let tx_hash = format!("0x{}", uuid::Uuid::new_v4().simple());
    let mut fragments =
        Fragment::from_split(&tx_hash, &config.token_type, &parts, config.start_block_height);

    eprintln!(
        "{} {} {} as {} fragment(s) (tx {})",
        "Routing".bold(),
        total.to_string().bright_yellow(),
        config.token_type,
        fragments.len(),
        tx_hash.dimmed()
    );

    let mut outcomes = engine.route_all(&mut fragments, parallel).await;
    for (fragment, routed) in fragments.iter_mut().zip(outcomes.iter_mut()) {
        // Each failed attempt counts against the fragment, so this terminates.
        while !*routed && failures.may_retry(&fragment.id) {
            debug!(
                "Retrying fragment {} after {} failure(s)",
                fragment.id,
                failures.failures_of(&fragment.id)
            );
            *routed = engine.route_fragment(fragment).await;
        }
        if !*routed {
            warn!(
                "Fragment {} gave up after {} attempt(s)",
                fragment.id,
                failures.failures_of(&fragment.id)
            );
        }
    }

    for (fragment, routed) in fragments.iter().zip(&outcomes) {
        let summary = FragmentSummary {
            id: &fragment.id,
            amount: fragment.amount.to_string(),
            routed: *routed,
            remix_count: fragment.remix_count,
            metadata_hash: fragment.metadata_hash.as_deref(),
        };
        println!("{}", serde_json::to_string(&summary)?);
    }

    // Transmission is simulated as complete once the plan is reported.
    let released: usize = fragments
        .iter()
        .map(|fragment| engine.release_fragment(&fragment.id))
        .sum();
    debug!("Released {} connection slot(s)", released);

    let routed = outcomes.iter().filter(|ok| **ok).count();
    info!("{}/{} fragments routed for tx {}", routed, outcomes.len(), tx_hash);
    let status = format!("{}/{} routed", routed, outcomes.len());
    if routed == outcomes.len() {
        eprintln!("{} {}", "✓".green(), status);
    } else {
        eprintln!("{} {}", "✗".red(), status);
    }
    eprintln!(
        "  Paths recorded: {} (including dummies), marks: {}",
        metrics.paths_recorded(),
        ledger.mark_count()
    );
    print_distribution(&engine.anonymity_score());

    Ok(())
}

fn cmd_split(amount: &str, parts: usize) -> Result<()> {
    let total = parse_amount(amount)?;
    let shares = split_amount(total, parts).context("Failed to split amount")?;

    println!("{} {} into {} parts", "Split".bold(), total, shares.len());
    for (i, share) in shares.iter().enumerate() {
        println!("  {} {}", format!("#{}", i + 1).dimmed(), share.to_string().bright_cyan());
    }
    Ok(())
}

fn cmd_policy(config_path: Option<PathBuf>, action: PolicyAction) -> Result<()> {
    match action {
        PolicyAction::Show => {
            let config = Config::load(config_path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config.policy)?);
        }
        PolicyAction::Check { file } => {
            let policy = SecurityPolicy::load(&file)
                .with_context(|| format!("Policy {} is invalid", file.display()))?;
            println!("{} {} is valid", "✓".green(), file.display());
            println!(
                "  Path length {}-{}, batch window {}-{}s, dummy ratio {}",
                policy.min_path_length,
                policy.max_path_length,
                policy.min_batch_window,
                policy.max_batch_window,
                policy.dummy_fragment_ratio
            );
        }
    }
    Ok(())
}

fn cmd_relays(config_path: Option<PathBuf>, all: bool) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let relays = relay_pool(&config)?;
    let eligible = relays
        .iter()
        .filter(|r| r.is_eligible(&config.policy))
        .count();

    println!(
        "{} ({} eligible of {})",
        "Relays".bold(),
        eligible,
        relays.len()
    );
    println!();

    for relay in &relays {
        let ok = relay.is_eligible(&config.policy);
        if !ok && !all {
            continue;
        }
        let marker = if ok { "•".bright_green() } else { "•".red() };
        println!("  {} {} {}", marker, relay.id.bright_cyan(), relay.address.dimmed());
        println!(
            "    stake {}  reputation {:.2}  connections {}  failures {}  weight {:.1}",
            relay.stake,
            relay.reputation,
            relay.connections,
            relay.failed_attempts,
            relay.weight()
        );
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    let mut config = Config::load(config_path.as_deref())?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            let target = match config_path {
                Some(path) => path,
                None => Config::config_file()?,
            };
            config.save_to(&target)?;
            println!("{} {} = {}", "✓".green(), key, value.bright_cyan());
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown or unset config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<20} {}", key, value.bright_cyan());
            }
        }
    }
    Ok(())
}

fn parse_amount(amount: &str) -> Result<Amount> {
    amount
        .parse::<Amount>()
        .with_context(|| format!("Invalid amount: {}", amount))
}

fn plan_store(config: &Config) -> Result<Arc<dyn PlanStore>> {
    match &config.storage_path {
        Some(path) => {
            let storage = SledStorage::open(path)
                .with_context(|| format!("Failed to open plan store at {}", path))?;
            Ok(Arc::new(BackendPlanStore::new(storage)))
        }
        None => Ok(Arc::new(BackendPlanStore::new(MemoryStorage::new()))),
    }
}

fn relay_pool(config: &Config) -> Result<Vec<Relay>> {
    Ok(config.load_relays()?.unwrap_or_else(|| synthetic_pool(16)))
}

/// Mixed pool: most relays eligible, some short on stake, reputation or health
fn synthetic_pool(count: usize) -> Vec<Relay> {
    (0..count)
        .map(|i| Relay {
            id: format!("relay-{:02}", i),
            address: format!("10.{}.{}.1", 10 + i, i % 7),
            bandwidth: 1_000 + 250 * i as u64,
            reputation: 0.75 + (i % 6) as f64 * 0.05,
            last_active: 0,
            stake: Amount::from_whole(80 + 15 * i as u64),
            connections: (i % 5) as u32,
            failed_attempts: u32::from(i % 4 == 3),
        })
        .collect()
}

fn print_distribution(metrics: &AnonymityMetrics) {
    let mut usage: Vec<_> = metrics.relay_distribution.iter().collect();
    usage.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    eprintln!("  Relay usage:");
    for (relay_id, count) in usage {
        eprintln!("    {:<10} {}", relay_id, count);
    }
}
