use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use core_types::{Address, BalanceSource, MarketDataSource, PuzzleDescriptor, WalletSession};
use feed_balance::{RpcConfig, SolanaRpcBalance};
use feed_market::{DexScreenerFeed, MarketFeedConfig};
use infra_bus::RingBus;
use serde::{Deserialize, Serialize};
use unlock_engine::{default_ladder, GateConfig, UnlockEngine, DEFAULT_MINT};

#[derive(Parser, Debug)]
#[command(name = "solv3-gate", about = "Puzzle gate operations CLI", version)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one market snapshot and show which puzzles it unlocks.
    Snapshot(SnapshotArgs),
    /// Read a wallet's token balance and show the access verdict.
    Balance(BalanceArgs),
    /// Show the unlock ladder at a given market cap.
    Ladder(LadderArgs),
    /// Validate the [gate] section of a service config file.
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct LadderOpts {
    /// Comma-separated USD thresholds for puzzles 1..=n.
    #[arg(long, env = "SOLV3_GATE_THRESHOLDS")]
    thresholds: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct SnapshotArgs {
    #[arg(long, env = "SOLV3_MARKET_ENDPOINT", default_value = "https://api.dexscreener.com")]
    endpoint: String,
    #[arg(long, default_value = "solana")]
    chain: String,
    #[arg(long, env = "SOLV3_GATE_MINT", default_value = DEFAULT_MINT)]
    token: String,
    #[command(flatten)]
    ladder: LadderOpts,
}

#[derive(Args, Debug, Clone)]
struct BalanceArgs {
    #[arg(long)]
    owner: String,
    #[arg(long, env = "SOLV3_GATE_MINT", default_value = DEFAULT_MINT)]
    mint: String,
    #[arg(long, env = "SOLV3_RPC_ENDPOINT", default_value = "https://api.mainnet-beta.solana.com")]
    rpc: String,
    #[arg(long, env = "SOLV3_GATE_MINIMUM", default_value_t = 100_000.0)]
    minimum: f64,
}

#[derive(Args, Debug, Clone)]
struct LadderArgs {
    #[arg(long, default_value_t = 0.0)]
    market_cap: f64,
    #[command(flatten)]
    ladder: LadderOpts,
}

#[derive(Args, Debug, Clone)]
struct CheckConfigArgs {
    #[arg(long, env = "SOLV3_GATE_CONFIG_PATH", default_value = "configs/gate.toml")]
    path: PathBuf,
}

/// Only `[gate]` is checked here; the other sections belong to the service.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    gate: GateConfig,
}

#[derive(Serialize)]
struct BalanceReport {
    owner: Address,
    mint: Address,
    balance: Option<f64>,
    error: Option<String>,
    minimum_required_balance: f64,
    access_granted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "gate_cli=debug,feed_market=debug,feed_balance=debug");
    }
    let _log_guard = observability::init_tracing("gate_cli");

    match cli.command {
        Commands::Snapshot(args) => run_snapshot(args).await,
        Commands::Balance(args) => run_balance(args).await,
        Commands::Ladder(args) => run_ladder(args),
        Commands::CheckConfig(args) => run_check_config(args),
    }
}

async fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    let cfg = MarketFeedConfig {
        endpoint: args.endpoint,
        chain: args.chain,
        token_address: args.token,
        ..MarketFeedConfig::default()
    };
    tracing::debug!(url = %cfg.url(), "fetching snapshot");
    let feed = DexScreenerFeed::new(cfg);
    let snapshot = feed.fetch_snapshot().await.context("market snapshot")?;

    let mut engine = engine_for(&args.ladder)?;
    let seq = engine.begin_market_poll();
    engine.refresh_market_snapshot(seq, Ok(snapshot));
    print_json(&serde_json::json!({
        "snapshot": engine.snapshot(),
        "puzzles": engine.puzzle_board(),
        "unlock_progress_pct": engine.view().unlock_progress_pct,
    }))
}

async fn run_balance(args: BalanceArgs) -> Result<()> {
    let owner = Address::parse(&args.owner).context("--owner")?;
    let mint = Address::parse(&args.mint).context("--mint")?;
    let source = SolanaRpcBalance::new(RpcConfig {
        endpoint: args.rpc,
        ..RpcConfig::default()
    });

    let gate = GateConfig {
        mint: mint.clone(),
        minimum_required_balance: args.minimum,
        ..GateConfig::default()
    };
    let mut engine = UnlockEngine::new(gate, RingBus::new(16))?;
    let Some(request) = engine.set_wallet_session(WalletSession::connected(owner.clone())) else {
        anyhow::bail!("no balance request issued for a connected session");
    };
    let result = source.fetch_holding(&owner, &mint).await;
    let error = result.as_ref().err().map(ToString::to_string);
    engine.refresh_token_holding(&request, result);

    print_json(&BalanceReport {
        owner,
        mint,
        balance: engine.holding().and_then(|h| h.balance),
        error,
        minimum_required_balance: args.minimum,
        access_granted: engine.access_granted(),
    })
}

fn run_ladder(args: LadderArgs) -> Result<()> {
    let puzzles = ladder_from(&args.ladder)?;
    let unlocked = unlock_engine::compute_unlocked_puzzles(Some(args.market_cap), &puzzles);
    for p in &puzzles {
        let mark = if unlocked.contains(&p.id) { "unlocked" } else { "locked" };
        println!("puzzle {:>2}  {:>12}  {mark}", p.id, p.unlock_threshold_usd);
    }
    Ok(())
}

fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.path)
        .with_context(|| format!("read config {}", args.path.display()))?;
    let (gate, warnings) =
        check_config(&raw).with_context(|| format!("check config {}", args.path.display()))?;
    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!(
        "ok: {} puzzles, mint {}, minimum balance {}",
        gate.puzzles.len(),
        gate.mint,
        gate.minimum_required_balance
    );
    Ok(())
}

fn check_config(raw: &str) -> Result<(GateConfig, Vec<String>)> {
    let file: ConfigFile = toml::from_str(raw).context("parse toml")?;
    let warnings = file.gate.validate().context("invalid [gate] section")?;
    Ok((file.gate, warnings))
}

fn engine_for(opts: &LadderOpts) -> Result<UnlockEngine> {
    let gate = GateConfig {
        puzzles: ladder_from(opts)?,
        ..GateConfig::default()
    };
    Ok(UnlockEngine::new(gate, RingBus::new(16))?)
}

fn ladder_from(opts: &LadderOpts) -> Result<Vec<PuzzleDescriptor>> {
    let Some(raw) = opts.thresholds.as_deref() else {
        return Ok(default_ladder());
    };
    parse_thresholds(raw)
}

fn parse_thresholds(raw: &str) -> Result<Vec<PuzzleDescriptor>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| {
            let cap = s
                .parse::<f64>()
                .with_context(|| format!("threshold {s:?} is not a number"))?;
            Ok(PuzzleDescriptor {
                id: i as u32 + 1,
                unlock_threshold_usd: cap,
            })
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
