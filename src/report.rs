use crate::{chain::ChainReader, error::FusionResult};
use alloy::primitives::{Address, B256, U256, utils::format_units};
use chrono::{DateTime, Utc};
use init4_bin_base::deps::tracing::{debug, instrument};
use std::fmt::Write as _;

/// One token balance inside a [`BalanceSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    /// Token address.
    pub token: Address,
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
    /// Balance in base units.
    pub raw: U256,
    /// Balance in whole units.
    pub formatted: String,
}

/// Point-in-time balances of the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Block the balances were read at.
    pub block_number: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Balances, in the order the tokens were requested.
    pub balances: Vec<TokenBalance>,
}

impl BalanceSnapshot {
    /// Balance entry for `token`.
    pub fn get(&self, token: Address) -> Option<&TokenBalance> {
        self.balances.iter().find(|balance| balance.token == token)
    }

    /// Raw balance of `token`, zero when absent.
    pub fn raw(&self, token: Address) -> U256 {
        self.get(token).map(|balance| balance.raw).unwrap_or_default()
    }
}

/// Outcome of a fused approve + supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Relay-side execution hash.
    pub hash: B256,
    /// Whether the execution succeeded.
    pub success: bool,
    /// Token supplied to the pool.
    pub stablecoin: Address,
    /// Token minted by the pool for the supply.
    pub receipt_token: Address,
    /// Stablecoin supplied to the pool.
    pub supplied: U256,
    /// Receipt tokens received for the supply.
    pub received: U256,
    /// Balances before execution.
    pub before: BalanceSnapshot,
    /// Balances after execution.
    pub after: BalanceSnapshot,
}

/// Read `tokens` balances of `wallet`.
#[instrument(skip(chain, tokens))]
pub async fn take_snapshot<C: ChainReader>(
    chain: &C,
    wallet: Address,
    tokens: &[Address],
) -> FusionResult<BalanceSnapshot> {
    let block_number = chain.block_number().await?;
    let mut balances = Vec::with_capacity(tokens.len());
    for token in tokens {
        let meta = chain.token_meta(*token).await?;
        let raw = chain.token_balance(*token, wallet).await?;
        balances.push(TokenBalance {
            token: *token,
            formatted: format_amount(raw, meta.decimals),
            symbol: meta.symbol,
            decimals: meta.decimals,
            raw,
        });
    }
    debug!(block_number, tokens = balances.len(), "balance snapshot taken");
    Ok(BalanceSnapshot { block_number, taken_at: Utc::now(), balances })
}

/// Format base units as whole units, trimming trailing zeros.
pub fn format_amount(raw: U256, decimals: u8) -> String {
    let Ok(formatted) = format_units(raw, decimals) else {
        return raw.to_string();
    };
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_owned()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}

/// Signed difference `after - before`, formatted in whole units.
pub fn format_delta(before: U256, after: U256, decimals: u8) -> String {
    if after >= before {
        format!("+{}", format_amount(after - before, decimals))
    } else {
        format!("-{}", format_amount(before - after, decimals))
    }
}

/// Render a snapshot as an aligned table.
pub fn render_snapshot(title: &str, snapshot: &BalanceSnapshot) -> String {
    let mut out = format!(
        "{title} (block {}, {})\n",
        snapshot.block_number,
        snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for balance in &snapshot.balances {
        let _ = writeln!(out, "  {:<10} {:>24}", balance.symbol, balance.formatted);
    }
    out
}

/// Render the before/after summary of a run.
pub fn render_summary(result: &TransactionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Fusion transaction {}", result.hash);
    let _ = writeln!(out, "  status    {}", if result.success { "success" } else { "failed" });

    let decimals_of = |token| result.before.get(token).map(|b| b.decimals).unwrap_or(18);
    let supplied = format_amount(result.supplied, decimals_of(result.stablecoin));
    let received = format_amount(result.received, decimals_of(result.receipt_token));
    let _ = writeln!(out, "  supplied  {supplied}");
    let _ = writeln!(out, "  received  {received}");
    out.push('\n');

    out.push_str(&render_snapshot("Before", &result.before));
    out.push_str(&render_snapshot("After", &result.after));

    out.push_str("Changes\n");
    for before in &result.before.balances {
        let after = result.after.raw(before.token);
        let _ = writeln!(
            out,
            "  {:<10} {:>24}",
            before.symbol,
            format_delta(before.raw, after, before.decimals)
        );
    }
    out
}
