//! Check the fork node and the relay are reachable and usable, and report the
//! smart account's delegation status.

use fusion::{
    chain::ChainReader,
    config::Settings,
    report::{render_snapshot, take_snapshot},
    session::Session,
};
use init4_bin_base::{deps::tracing::info, utils::tracing::init_tracing};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env()?;
    let session = Session::connect(settings).await?;
    let info = session.relay_info();
    let account = session.account();

    let block = session.node().block_number().await?;
    info!(block, "node reachable");

    println!("relay      {} (version {})", session.relay().base(), info.version);
    for chain in &info.supported_chains {
        println!("  chain {} fee tokens {:?}", chain.chain_id, chain.fee_tokens);
    }
    println!("node       {} (block {block})", session.settings().rpc_url());
    println!("account    {}", account.address());
    match account.implementation() {
        Some(implementation) if account.is_delegated() => {
            println!("delegation installed, implementation {implementation}")
        }
        Some(implementation) => {
            println!("delegation pending, implementation {implementation}")
        }
        None => println!("delegation not used by this relay"),
    }

    let tokens = [session.settings().stablecoin, session.settings().receipt_token];
    let snapshot = take_snapshot(session.node(), account.address(), &tokens).await?;
    print!("{}", render_snapshot("Balances", &snapshot));

    Ok(())
}
