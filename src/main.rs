// src/main.rs
use anyhow::{anyhow, Context};
use clap::Parser;
use log::{error, info, warn};
use solana_sdk::{pubkey::Pubkey, signature::Signer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use solana_backrun_bot::{
    arbitrage::{
        pre_simulation::parse_mempool_line, BackrunPipeline, JitoRpcSimulator, MarketGraph,
        MempoolUpdate, PipelineSettings, PostSimulationFilter, PreSimulationFilter,
        RouteSearchEngine, SearchSettings, SimulationStage,
    },
    bundle::{
        lending::load_banks, BuilderSettings, BundleBuilder, BundleSender, LendingProvider,
        LookupTableProvider, MarginfiLendingProvider, RpcLookupTableManager, TradeLog,
    },
    config::{load_config, CapitalStrategy, Config},
    dex::{clients::JupiterClient, pool_listing::load_pool_listing, MarketRegistry, SwapQuoter},
    jito_bundle::JitoBundleSubmitter,
    solana::SolanaRpcClient,
    utils::{load_keypair, now_ms, setup_logging, Timings},
    workers::{register_pools, seed_accounts, spawn_account_refresh, FallbackQuoter, PoolReplica, QuoteWorkerPool},
};

#[derive(Parser, Debug)]
#[command(name = "solana-backrun-bot", version, about = "Backruns pending Solana swaps with atomic arbitrage bundles")]
struct Cli {
    /// Load configuration from this dotenv file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Build bundles but do not submit them
    #[arg(long)]
    dry_run: bool,
}

/// Reads base64 transactions from stdin, one mempool update per line.
fn spawn_stdin_mempool(tx: mpsc::UnboundedSender<MempoolUpdate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let received = now_ms();
                    match parse_mempool_line(&line) {
                        Ok(txns) if txns.is_empty() => {}
                        Ok(txns) => {
                            let update = MempoolUpdate {
                                txns,
                                timings: Timings::received_at(received),
                            };
                            if tx.send(update).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping mempool line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("Mempool input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read mempool input: {}", e);
                    break;
                }
            }
        }
    })
}

fn lending_provider(config: &Config, authority: Pubkey) -> anyhow::Result<Option<Arc<dyn LendingProvider>>> {
    if config.capital_strategy != CapitalStrategy::FlashLoan {
        return Ok(None);
    }
    let account = config
        .marginfi_account
        .ok_or_else(|| anyhow!("MARGINFI_ACCOUNT is required for flash loans"))?;
    let banks_path = config
        .marginfi_banks_path
        .as_deref()
        .ok_or_else(|| anyhow!("MARGINFI_BANKS_PATH is required for flash loans"))?;
    let banks = load_banks(Path::new(banks_path))?;
    Ok(Some(Arc::new(MarginfiLendingProvider::new(
        config.marginfi_program_id,
        config.marginfi_group,
        account,
        authority,
        banks,
    ))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.env_file.as_deref())?;
    setup_logging(config.log_level.as_deref()).context("Failed to initialize logging")?;
    config.validate_and_log();
    let dry_run = cli.dry_run || config.dry_run;
    info!("Solana backrun bot starting{}", if dry_run { " (dry run)" } else { "" });

    let payer = Arc::new(load_keypair(&config.payer_keypair_path)?);
    info!("Payer: {}", payer.pubkey());

    let rpc = Arc::new(SolanaRpcClient::new(
        &config.rpc_url,
        config.rpc_url_backup.clone().unwrap_or_default(),
        config.rpc_max_retries.unwrap_or(3),
        Duration::from_millis(config.rpc_retry_delay_ms.unwrap_or(500)),
    ));
    if !rpc.is_healthy().await {
        warn!("RPC endpoint {} reports unhealthy", config.rpc_url);
    }

    // --- Markets ---
    let base_mints: HashSet<Pubkey> = config.base_mints.iter().copied().collect();
    let markets: Vec<Arc<_>> = load_pool_listing(Path::new(&config.pool_listing_path), &base_mints)?
        .into_iter()
        .map(Arc::new)
        .collect();
    let graph = MarketGraph::new();
    let mut registry = MarketRegistry::new();
    for market in &markets {
        graph.add_market(market.mint_a, market.mint_b, market.clone());
        registry.insert(market.clone());
    }
    info!(
        "Loaded {} markets over {} mints",
        graph.market_count(),
        graph.mint_count()
    );
    let registry = Arc::new(registry);

    // --- Quote workers ---
    let quoter: Arc<dyn SwapQuoter> = Arc::new(JupiterClient::new(&config.swap_quote_url)?);
    let workers = Arc::new(QuoteWorkerPool::new(config.num_worker_threads, |_| {
        PoolReplica::new(Some(FallbackQuoter {
            quoter: quoter.clone(),
            slippage_bps: config.worker_quote_slippage_bps,
            max_accounts: config.worker_quote_max_accounts,
        }))
    })?);
    let tracked = register_pools(&workers, &markets).await?;
    let failed = seed_accounts(&workers, rpc.as_ref(), &tracked).await?;
    if !failed.is_empty() {
        let still_failed = seed_accounts(&workers, rpc.as_ref(), &failed).await?;
        if !still_failed.is_empty() {
            warn!("{} accounts still not seeded; they are retried by the refresh task", still_failed.len());
        }
    }
    let refresh = spawn_account_refresh(
        workers.clone(),
        rpc.clone(),
        tracked,
        Duration::from_millis(config.account_refresh_interval_ms),
    );

    // --- Stages ---
    let lookup_tables = Arc::new(LookupTableProvider::new(rpc.clone()));
    let builder = BundleBuilder::new(
        payer.clone(),
        quoter.clone(),
        lookup_tables.clone(),
        Arc::new(RpcLookupTableManager::new(rpc.clone(), payer.clone())),
        lending_provider(&config, payer.pubkey())?,
        BuilderSettings::from_config(&config),
    );
    let pipeline = BackrunPipeline {
        pre_simulation: Arc::new(PreSimulationFilter::new(
            registry.clone(),
            lookup_tables,
            config.skip_tx_addresses.iter().copied(),
        )),
        simulation: Arc::new(SimulationStage::new(
            Arc::new(JitoRpcSimulator::new(config.simulation_url())?),
            config.max_pending_simulations,
            config.max_simulation_age_ms,
        )),
        post_simulation: Arc::new(PostSimulationFilter::new(
            registry,
            base_mints.clone(),
            config.max_post_sim_age_ms,
        )),
        search: Arc::new(RouteSearchEngine::new(
            Arc::new(graph),
            workers.clone(),
            base_mints,
            SearchSettings::from_config(&config),
        )),
        builder: Arc::new(builder),
        settings: PipelineSettings::from_config(&config),
    };

    let trade_log = Arc::new(TradeLog::open(&config.trades_log_path).await?);
    let sender = Arc::new(BundleSender::new(
        Arc::new(JitoBundleSubmitter::new(config.block_engine_url.clone())?),
        trade_log,
        Duration::from_millis(config.check_landed_delay_ms),
        config.max_send_age_ms,
        dry_run,
    ));

    let (mempool_tx, mempool_rx) = mpsc::unbounded_channel();
    let reader = spawn_stdin_mempool(mempool_tx);
    let mut running = pipeline.start(mempool_rx, sender.clone());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        result = &mut running => {
            if let Err(e) = result {
                error!("Pipeline task failed: {}", e);
            }
        }
    }

    reader.abort();
    refresh.abort();
    if sender.in_transit_count() > 0 {
        info!("{} bundles still in transit at shutdown", sender.in_transit_count());
    }
    info!(
        "Quote workers saw {} late replies",
        workers.late_replies()
    );
    Ok(())
}
