use crate::{
    chain::ForkControl,
    error::{FailureKind, FusionError, FusionResult},
};
use alloy::primitives::{Address, TxHash, U256, uint};
use init4_bin_base::deps::tracing::{debug, info, instrument, warn};

/// Native balance granted to a donor so it can pay for its transfer (10 ether).
pub const DEFAULT_GAS_ALLOWANCE: U256 = uint!(10_000_000_000_000_000_000_U256);

/// Result of [`Funder::ensure_balance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingOutcome {
    /// Wallet balance before funding.
    pub before: U256,
    /// Wallet balance after funding.
    pub after: U256,
    /// Donor transfers made, in order.
    pub transfers: Vec<TxHash>,
}

impl FundingOutcome {
    /// Whether any transfer was needed.
    pub fn funded(&self) -> bool {
        !self.transfers.is_empty()
    }
}

/// Tops up a wallet's stablecoin balance from donor accounts on a fork.
#[derive(Debug)]
pub struct Funder<'a, C> {
    chain: &'a C,
    token: Address,
    wallet: Address,
    donors: Vec<Address>,
    gas_allowance: U256,
}

impl<'a, C> Funder<'a, C>
where
    C: ForkControl + Sync,
{
    /// Create a funder for `wallet`, borrowing `token` from `donors` in order.
    pub fn new(chain: &'a C, token: Address, wallet: Address, donors: Vec<Address>) -> Self {
        Self { chain, token, wallet, donors, gas_allowance: DEFAULT_GAS_ALLOWANCE }
    }

    /// Override the native balance granted to the selected donor.
    pub const fn with_gas_allowance(mut self, gas_allowance: U256) -> Self {
        self.gas_allowance = gas_allowance;
        self
    }

    /// Make sure the wallet holds at least `target`.
    ///
    /// Transfers the shortfall first. If the wallet is still short afterwards,
    /// transfers the full `target` once more before giving up.
    #[instrument(skip(self), fields(wallet = %self.wallet, token = %self.token))]
    pub async fn ensure_balance(&self, target: U256) -> FusionResult<FundingOutcome> {
        let before = self.balance().await?;
        if before >= target {
            info!(%before, %target, "wallet already funded");
            return Ok(FundingOutcome { before, after: before, transfers: vec![] });
        }

        let shortfall = target - before;
        info!(%before, %target, %shortfall, "wallet below target, funding shortfall");
        let mut transfers = vec![self.transfer_from_donor(shortfall).await?];

        let after = self.balance().await?;
        if after >= target {
            return Ok(FundingOutcome { before, after, transfers });
        }

        warn!(%after, %target, "still short after funding, requesting the full target");
        transfers.push(self.transfer_from_donor(target).await?);

        let after = self.balance().await?;
        if after < target {
            return Err(FusionError::infra(
                FailureKind::Shortfall,
                format!("wallet still short by {} after funding", target - after),
            ));
        }
        info!(%after, "wallet funded");
        Ok(FundingOutcome { before, after, transfers })
    }

    /// Move `amount` into the wallet from the first donor that can cover it.
    #[instrument(skip(self))]
    pub async fn transfer_from_donor(&self, amount: U256) -> FusionResult<TxHash> {
        let donor = self.select_donor(amount).await?;
        info!(%donor, %amount, "borrowing from donor");

        self.chain.impersonate(donor).await?;
        let outcome = self.send_as(donor, amount).await;
        // always release, even when the transfer failed
        if let Err(err) = self.chain.stop_impersonating(donor).await {
            warn!(%donor, error = %err, "failed to stop impersonating donor");
        }
        outcome
    }

    /// The first donor, in list order, holding at least `amount`.
    ///
    /// Donors whose balance cannot be read are skipped.
    pub async fn select_donor(&self, amount: U256) -> FusionResult<Address> {
        for donor in &self.donors {
            match self.chain.token_balance(self.token, *donor).await {
                Ok(balance) if balance >= amount => {
                    debug!(%donor, %balance, "donor selected");
                    return Ok(*donor);
                }
                Ok(balance) => debug!(%donor, %balance, "donor balance too low"),
                Err(err) => warn!(%donor, error = %err, "skipping donor, balance read failed"),
            }
        }
        Err(FusionError::infra(
            FailureKind::Unknown,
            format!("no suitable donor found for amount {amount}"),
        ))
    }

    async fn send_as(&self, donor: Address, amount: U256) -> FusionResult<TxHash> {
        self.chain.set_native_balance(donor, self.gas_allowance).await?;
        self.chain.transfer_as(self.token, donor, self.wallet, amount).await
    }

    async fn balance(&self) -> FusionResult<U256> {
        self.chain.token_balance(self.token, self.wallet).await
    }
}
