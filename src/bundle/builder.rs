// src/bundle/builder.rs
//! Turns a route search result into a signed `[victim, arb]` bundle.

use log::{debug, error, info, warn};
use solana_sdk::{
    address_lookup_table::state::LOOKUP_TABLE_MAX_ADDRESSES,
    hash::Hash,
    instruction::Instruction,
    message::VersionedMessage,
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::arbitrage::scheduler::prioritize;
use crate::arbitrage::types::{ArbOpportunity, Route};
use crate::bundle::lending::LendingProvider;
use crate::bundle::lookup_tables::{LookupTableEntry, LookupTableManager, LookupTableProvider};
use crate::bundle::packing::{compile_message, pack, PackingOutcome};
use crate::config::{CapitalStrategy, Config};
use crate::dex::{DexLabel, QuoteRequest, SwapQuoter};
use crate::error::ArbError;
use crate::jito_bundle::{compute_tip, create_tip_instruction, select_random_tip_account};
use crate::utils::{now_ms, Timings};

/// Slippage used when pricing the profit in SOL; the quote is only informative.
const PROFIT_QUOTE_SLIPPAGE_BPS: u16 = 100;
/// Uncovered keys above which an on-chain table extension is worth a round trip.
const MIN_UNCOVERED_TO_EXTEND: usize = 2;

/// A bundle ready for submission together with what the trades log needs.
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    pub bundle: Vec<VersionedTransaction>,
    pub arb_size: u64,
    pub expected_profit: u64,
    pub hop_dexes: Vec<DexLabel>,
    pub source_mint: Pubkey,
    pub intermediate_mints: Vec<Pubkey>,
    pub tip_lamports: u64,
    pub timings: Timings,
}

#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub min_profit_lamports: u64,
    pub max_tip_lamports: u64,
    pub slippage_bps: u16,
    pub max_accounts: u16,
    pub capital_strategy: CapitalStrategy,
    pub max_age_ms: u64,
}

impl BuilderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_profit_lamports: config.min_profit_lamports,
            max_tip_lamports: config.max_tip_lamports,
            slippage_bps: config.swap_slippage_bps,
            max_accounts: config.swap_max_accounts,
            capital_strategy: config.capital_strategy,
            max_age_ms: config.max_build_age_ms,
        }
    }
}

/// Larger expected profit first.
pub fn more_profitable_first(a: &ArbOpportunity, b: &ArbOpportunity) -> Ordering {
    b.expected_profit.cmp(&a.expected_profit)
}

struct SwapLegs {
    instructions: Vec<Instruction>,
    tables: Vec<Arc<LookupTableEntry>>,
}

pub struct BundleBuilder {
    payer: Arc<Keypair>,
    quoter: Arc<dyn SwapQuoter>,
    lookup_tables: Arc<LookupTableProvider>,
    table_manager: Arc<dyn LookupTableManager>,
    lending: Option<Arc<dyn LendingProvider>>,
    settings: BuilderSettings,
}

impl BundleBuilder {
    pub fn new(
        payer: Arc<Keypair>,
        quoter: Arc<dyn SwapQuoter>,
        lookup_tables: Arc<LookupTableProvider>,
        table_manager: Arc<dyn LookupTableManager>,
        lending: Option<Arc<dyn LendingProvider>>,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            payer,
            quoter,
            lookup_tables,
            table_manager,
            lending,
            settings,
        }
    }

    /// Expected profit denominated in lamports.
    pub async fn profit_in_lamports(&self, source_mint: &Pubkey, expected_profit: u64) -> Result<u64, ArbError> {
        let wsol = spl_token::native_mint::id();
        if *source_mint == wsol || expected_profit == 0 {
            return Ok(expected_profit);
        }
        let quote = self
            .quoter
            .quote(&QuoteRequest {
                source_mint: *source_mint,
                destination_mint: wsol,
                amount: expected_profit,
                slippage_bps: PROFIT_QUOTE_SLIPPAGE_BPS,
                max_accounts: self.settings.max_accounts,
            })
            .await?;
        Ok(quote.out_amount)
    }

    /// Quotes every hop with the realized output of the previous one and
    /// fetches the executable swap instruction plus its lookup tables.
    async fn swap_legs(&self, route: &Route, arb_size: u64) -> Result<SwapLegs, ArbError> {
        let payer = self.payer.pubkey();
        let mut instructions = Vec::with_capacity(route.len());
        let mut tables: Vec<Arc<LookupTableEntry>> = Vec::new();
        let mut amount = arb_size;

        for hop in &route.hops {
            let quote = self
                .quoter
                .quote(&QuoteRequest {
                    source_mint: hop.source_mint(),
                    destination_mint: hop.destination_mint(),
                    amount,
                    slippage_bps: self.settings.slippage_bps,
                    max_accounts: self.settings.max_accounts,
                })
                .await?;
            if quote.out_amount == 0 {
                return Err(ArbError::QuoteError(format!(
                    "zero output for {} -> {} on {}",
                    hop.source_mint(),
                    hop.destination_mint(),
                    hop.market.dex_label
                )));
            }
            amount = quote.out_amount;

            let swap = self.quoter.swap_instructions(&quote, &payer).await?;
            instructions.push(swap.swap_instruction);
            for key in swap.lookup_table_addresses {
                match self.lookup_tables.get_lookup_table(&key).await {
                    Some(table) => tables.push(table),
                    None => warn!("Swap lookup table {} unavailable", key),
                }
            }
        }

        Ok(SwapLegs { instructions, tables })
    }

    /// Orders the arb transaction's instructions for the capital strategy.
    pub fn assemble(
        &self,
        source_mint: &Pubkey,
        arb_size: u64,
        swaps: Vec<Instruction>,
        tip: Instruction,
    ) -> Result<Vec<Instruction>, ArbError> {
        match self.settings.capital_strategy {
            CapitalStrategy::OwnFunds => {
                let mut ixs = swaps;
                ixs.push(tip);
                Ok(ixs)
            }
            CapitalStrategy::FlashLoan => {
                let lending = self.lending.as_ref().ok_or_else(|| {
                    ArbError::InstructionError("flash loan strategy without a lending provider".to_string())
                })?;
                // begin, borrow, swaps.., repay, end
                let end_index = swaps.len() as u64 + 3;
                let mut ixs = Vec::with_capacity(swaps.len() + 5);
                ixs.push(lending.begin_flash_loan(end_index)?);
                ixs.push(lending.borrow(source_mint, arb_size)?);
                ixs.extend(swaps);
                ixs.push(lending.repay(source_mint, arb_size, true)?);
                ixs.push(lending.end_flash_loan(&[])?);
                ixs.push(tip);
                Ok(ixs)
            }
        }
    }

    /// Packs lookup tables; extends or creates one of our own tables when
    /// packing alone leaves the transaction oversized.
    async fn fit_transaction(
        &self,
        instructions: &[Instruction],
        preselected: &[Arc<LookupTableEntry>],
        blockhash: Hash,
    ) -> Result<PackingOutcome, ArbError> {
        let payer = self.payer.pubkey();
        let outcome = pack(&payer, instructions, preselected, &self.lookup_tables, blockhash);
        if outcome.fits {
            return Ok(outcome);
        }

        let outcome = if outcome.uncovered.len() > MIN_UNCOVERED_TO_EXTEND {
            warn!(
                "{} keys uncovered after packing, extending a lookup table",
                outcome.uncovered.len()
            );
            let table_key = self.extend_or_create(&outcome.uncovered).await?;
            self.lookup_tables.invalidate(&table_key);
            let mut tables = outcome.selected.clone();
            match self.lookup_tables.get_lookup_table(&table_key).await {
                Some(table) => tables.push(table),
                None => warn!("Lookup table {} not readable yet", table_key),
            }
            pack(&payer, instructions, &tables, &self.lookup_tables, blockhash)
        } else {
            outcome
        };

        if outcome.fits {
            return Ok(outcome);
        }
        match outcome.serialized_size {
            Some(size) => Err(ArbError::TransactionTooLarge {
                size,
                limit: PACKET_DATA_SIZE,
            }),
            None => Err(ArbError::TransactionError(
                "arb transaction does not compile".to_string(),
            )),
        }
    }

    /// Adds `addresses` to an active table we own that has room for them,
    /// creating a fresh table if there is none. Returns the table used.
    pub async fn extend_or_create(&self, addresses: &[Pubkey]) -> Result<Pubkey, ArbError> {
        if addresses.len() > LOOKUP_TABLE_MAX_ADDRESSES {
            return Err(ArbError::LookupTableError(format!(
                "{} addresses do not fit one table (max {})",
                addresses.len(),
                LOOKUP_TABLE_MAX_ADDRESSES
            )));
        }
        let payer = self.payer.pubkey();
        let owned = self.lookup_tables.tables().into_iter().find(|t| {
            t.active
                && t.authority == Some(payer)
                && t.addresses.len() + addresses.len() <= LOOKUP_TABLE_MAX_ADDRESSES
        });
        let table = match owned {
            Some(table) => table.key,
            None => self.table_manager.create_table().await?,
        };
        self.table_manager.extend_table(&table, addresses).await?;
        info!("Added {} addresses to lookup table {}", addresses.len(), table);
        Ok(table)
    }

    pub async fn build(&self, opportunity: ArbOpportunity) -> Result<BuiltBundle, ArbError> {
        let ArbOpportunity {
            source_txn,
            route,
            arb_size,
            expected_profit,
            timings,
        } = opportunity;
        let now = now_ms();
        if timings.is_older_than(self.settings.max_age_ms, now) {
            return Err(ArbError::Stale(format!("opportunity is {}ms old", timings.age_ms(now))));
        }
        if route.len() < 2 {
            return Err(ArbError::InstructionError(format!("route of {} hops", route.len())));
        }
        let source_mint = route
            .source_mint()
            .ok_or_else(|| ArbError::InstructionError("empty route".to_string()))?;

        let profit_lamports = self.profit_in_lamports(&source_mint, expected_profit).await?;
        if profit_lamports < self.settings.min_profit_lamports {
            return Err(ArbError::InsufficientProfit(format!(
                "{} lamports (min {})",
                profit_lamports, self.settings.min_profit_lamports
            )));
        }

        let SwapLegs {
            instructions: swaps,
            tables,
        } = self.swap_legs(&route, arb_size).await?;

        let payer = self.payer.pubkey();
        let (tip_lamports, tip_account) = {
            let mut rng = rand::thread_rng();
            (
                compute_tip(profit_lamports, self.settings.max_tip_lamports, &mut rng),
                select_random_tip_account(&mut rng),
            )
        };
        let tip = create_tip_instruction(&payer, tip_lamports, &tip_account);
        let instructions = self.assemble(&source_mint, arb_size, swaps, tip)?;

        let blockhash = *source_txn.message.recent_blockhash();
        let outcome = self.fit_transaction(&instructions, &tables, blockhash).await?;
        debug!(
            "Arb transaction packed with {} tables into {:?} bytes",
            outcome.selected.len(),
            outcome.serialized_size
        );

        let message = compile_message(&payer, &instructions, &outcome.table_accounts(), blockhash)?;
        let arb_txn = VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.payer.as_ref()])?;

        let intermediate_mints = route
            .hops
            .iter()
            .take(route.len() - 1)
            .map(|hop| hop.destination_mint())
            .collect();

        Ok(BuiltBundle {
            bundle: vec![source_txn, arb_txn],
            arb_size,
            expected_profit,
            hop_dexes: route.hops.iter().map(|hop| hop.market.dex_label).collect(),
            source_mint,
            intermediate_mints,
            tip_lamports,
            timings: timings.with_build_bundle_end(now_ms()),
        })
    }

    /// Opportunities are buffered most profitable first and built one at a time.
    pub fn spawn(
        self: Arc<Self>,
        opportunities: mpsc::UnboundedReceiver<ArbOpportunity>,
        high_water_mark: usize,
    ) -> mpsc::UnboundedReceiver<BuiltBundle> {
        let mut opportunities = prioritize(opportunities, more_profitable_first, high_water_mark, "build-bundle");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(opportunity) = opportunities.recv().await {
                match self.build(opportunity).await {
                    Ok(built) => {
                        if tx.send(built).is_err() {
                            break;
                        }
                    }
                    Err(ArbError::InsufficientProfit(msg)) => {
                        info!("Profit too small, skipping: {}", msg);
                    }
                    Err(ArbError::Stale(msg)) => debug!("dropping stale opportunity: {}", msg),
                    Err(e) => error!("Failed to build bundle ({:?}): {}", e.categorize(), e),
                }
            }
            debug!("build-bundle stage stopped");
        });
        rx
    }
}
