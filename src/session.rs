use crate::{
    account::{SmartAccount, initialize_account},
    chain::ForkNode,
    config::Settings,
    error::FusionResult,
    funding::{Funder, FundingOutcome},
    provider::{connect_provider, verify_chain_id},
    relay::{RelayClient, RelayInfo},
    report::TransactionResult,
    retry::retry,
    supply::{FusionSupply, SupplyPlan},
};
use alloy::primitives::U256;
use init4_bin_base::deps::tracing::{info, instrument};

/// Everything a run needs once the fork and relay are reachable.
#[derive(Debug)]
pub struct Session {
    settings: Settings,
    node: ForkNode,
    relay: RelayClient,
    info: RelayInfo,
    account: SmartAccount,
}

impl Session {
    /// Connect to the fork and the relay, and prepare the smart account.
    ///
    /// Each stage is retried according to the configured policy.
    #[instrument(skip_all, fields(rpc_url = %settings.rpc_url(), relay_url = %settings.relay_url))]
    pub async fn connect(settings: Settings) -> FusionResult<Self> {
        let rpc_url = settings.rpc_url();
        let provider = retry(&settings.retry, "connect to node", || async {
            let provider = connect_provider(settings.signer.clone(), &rpc_url).await?;
            verify_chain_id(&provider, settings.chain_id).await?;
            Ok(provider)
        })
        .await?;
        let node = ForkNode::new(provider);

        let relay = RelayClient::new(settings.relay_url.clone(), settings.relay_api_key.clone())?;
        let (info, account) = retry(&settings.retry, "initialize account", || {
            initialize_account(
                &relay,
                &node,
                &settings.signer,
                settings.chain_id,
                settings.stablecoin,
            )
        })
        .await?;

        info!(account = %account.address(), relay_version = %info.version, "session ready");
        Ok(Self { settings, node, relay, info, account })
    }

    /// Loaded settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The fork connection.
    pub const fn node(&self) -> &ForkNode {
        &self.node
    }

    /// The relay client.
    pub const fn relay(&self) -> &RelayClient {
        &self.relay
    }

    /// The relay info fetched while connecting.
    pub const fn relay_info(&self) -> &RelayInfo {
        &self.info
    }

    /// The prepared smart account.
    pub const fn account(&self) -> &SmartAccount {
        &self.account
    }

    /// A funder topping up the account's stablecoin from the configured donors.
    pub fn funder(&self) -> Funder<'_, ForkNode> {
        Funder::new(
            &self.node,
            self.settings.stablecoin,
            self.account.address(),
            self.settings.donors.clone(),
        )
    }

    /// Make sure the account holds at least `target` stablecoin, with retries.
    pub async fn ensure_funds(&self, target: U256) -> FusionResult<FundingOutcome> {
        let funder = self.funder();
        retry(&self.settings.retry, "fund wallet", || funder.ensure_balance(target)).await
    }

    /// Supply half the account's stablecoin balance, refusing below `min_balance`.
    ///
    /// The supply itself is not retried: a resubmitted execution could run twice.
    pub async fn supply_half(&self, min_balance: U256) -> FusionResult<TransactionResult> {
        let plan = SupplyPlan {
            stablecoin: self.settings.stablecoin,
            lending_pool: self.settings.lending_pool,
            receipt_token: self.settings.receipt_token,
            min_balance,
            poll_interval: self.settings.poll_interval,
            receipt_timeout: self.settings.receipt_timeout,
        };
        FusionSupply::new(&self.node, &self.relay, &self.account, plan).supply_half().await
    }
}
