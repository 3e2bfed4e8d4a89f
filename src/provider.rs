use crate::{
    config::Settings,
    error::{FailureKind, FusionError, FusionResult},
};
use alloy::{
    network::{Ethereum, EthereumWallet},
    node_bindings::{Anvil, AnvilInstance},
    providers::{
        Identity, Provider, ProviderBuilder, RootProvider,
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
    },
    signers::local::PrivateKeySigner,
};
use init4_bin_base::deps::tracing::{debug, info, instrument};

/// Type alias for the provider used to sign transactions on the fork.
pub type TxSenderProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
    Ethereum,
>;

/// Connect a provider capable of filling and sending transactions to the fork.
pub async fn connect_provider(
    signer: PrivateKeySigner,
    rpc_url: &str,
) -> FusionResult<TxSenderProvider> {
    ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect(rpc_url)
        .await
        .map_err(|err| FusionError::rpc(format!("failed to connect to {rpc_url}"), err))
}

/// Fail unless the node reports the expected chain ID.
#[instrument(skip(provider))]
pub async fn verify_chain_id<P: Provider>(provider: &P, expected: u64) -> FusionResult<()> {
    let actual = provider
        .get_chain_id()
        .await
        .map_err(|err| FusionError::rpc("failed to query chain id", err))?;
    if actual != expected {
        return Err(FusionError::infra(
            FailureKind::Configuration,
            format!("node reports chain id {actual}, expected {expected}"),
        ));
    }
    debug!(chain_id = actual, "chain id verified");
    Ok(())
}

/// Spawn a local Anvil fork of `FORK_URL` on the configured port.
///
/// The node is killed when the returned instance is dropped.
pub fn spawn_fork(settings: &Settings) -> FusionResult<AnvilInstance> {
    let mut anvil = Anvil::new()
        .fork(settings.fork_url.as_str())
        .port(settings.node_port)
        .chain_id(settings.chain_id);
    if let Some(block_time) = settings.block_time {
        anvil = anvil.block_time(block_time);
    }
    let instance = anvil.try_spawn().map_err(|err| {
        FusionError::infra_with(FailureKind::Connectivity, "failed to spawn anvil fork", err)
    })?;
    info!(
        endpoint = %instance.endpoint(),
        chain_id = settings.chain_id,
        "spawned local fork"
    );
    Ok(instance)
}
