//! Top up the wallet's stablecoin balance on a local fork from donor accounts.

use alloy::primitives::utils::parse_units;
use clap::Parser;
use fusion::{
    chain::{ChainReader, ForkNode},
    config::Settings,
    funding::Funder,
    provider::{connect_provider, spawn_fork, verify_chain_id},
    report::format_amount,
    retry::retry,
};
use init4_bin_base::{deps::tracing::info, utils::tracing::init_tracing};

#[derive(Parser, Debug)]
struct FundArgs {
    /// Balance to fund the wallet up to, in whole tokens.
    #[arg(long, default_value = "1000")]
    pub target: String,
    /// Spawn a local Anvil fork of FORK_URL instead of using a running node.
    #[arg(long, default_value_t = false)]
    pub spawn_fork: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = FundArgs::parse();
    let settings = Settings::from_env()?;
    let _fork = if args.spawn_fork { Some(spawn_fork(&settings)?) } else { None };

    let rpc_url = settings.rpc_url();
    let provider = retry(&settings.retry, "connect to node", || async {
        let provider = connect_provider(settings.signer.clone(), &rpc_url).await?;
        verify_chain_id(&provider, settings.chain_id).await?;
        Ok(provider)
    })
    .await?;
    let node = ForkNode::new(provider);

    let meta = node.token_meta(settings.stablecoin).await?;
    let target = parse_units(&args.target, meta.decimals)?.get_absolute();

    let funder =
        Funder::new(&node, settings.stablecoin, settings.wallet(), settings.donors.clone());
    let outcome =
        retry(&settings.retry, "fund wallet", || funder.ensure_balance(target)).await?;

    info!(transfers = outcome.transfers.len(), "funding complete");
    println!(
        "{} {}: {} -> {}",
        settings.wallet(),
        meta.symbol,
        format_amount(outcome.before, meta.decimals),
        format_amount(outcome.after, meta.decimals)
    );
    for hash in &outcome.transfers {
        println!("  transfer {hash}");
    }

    Ok(())
}
