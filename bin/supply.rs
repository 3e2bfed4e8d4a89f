//! Fund the wallet on a local fork, then approve and supply half of its
//! stablecoin balance to the lending pool in a single relayed transaction.

use alloy::primitives::{U256, utils::parse_units};
use clap::Parser;
use fusion::{
    chain::ChainReader,
    config::Settings,
    provider::spawn_fork,
    report::{format_amount, render_summary},
    session::Session,
};
use init4_bin_base::{
    deps::tracing::{debug, info},
    utils::tracing::init_tracing,
};

#[derive(Parser, Debug)]
struct SupplyArgs {
    /// Stablecoin balance to fund the wallet up to, in whole tokens.
    #[arg(long, default_value = "1000")]
    pub target: String,
    /// Refuse to supply below this stablecoin balance, in whole tokens.
    #[arg(long, default_value = "1")]
    pub min_balance: String,
    /// Spawn a local Anvil fork of FORK_URL instead of using a running node.
    #[arg(long, default_value_t = false)]
    pub spawn_fork: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = SupplyArgs::parse();
    let settings = Settings::from_env()?;
    info!(wallet = %settings.wallet(), chain_id = settings.chain_id, "Loaded settings");

    // kept alive for the whole run; the node stops on drop
    let _fork = if args.spawn_fork { Some(spawn_fork(&settings)?) } else { None };

    let session = Session::connect(settings).await?;

    let meta = session.node().token_meta(session.settings().stablecoin).await?;
    let target = to_base_units(&args.target, meta.decimals)?;
    let min_balance = to_base_units(&args.min_balance, meta.decimals)?;
    debug!(%target, %min_balance, symbol = %meta.symbol, "run policy");

    let funding = session.ensure_funds(target).await?;
    info!(
        before = %format_amount(funding.before, meta.decimals),
        after = %format_amount(funding.after, meta.decimals),
        transfers = funding.transfers.len(),
        "wallet funded"
    );

    let result = session.supply_half(min_balance).await?;
    println!("{}", render_summary(&result));

    Ok(())
}

fn to_base_units(amount: &str, decimals: u8) -> eyre::Result<U256> {
    Ok(parse_units(amount, decimals)?.get_absolute())
}
