use crate::{
    contracts::IERC20,
    error::{FailureKind, FusionError, FusionResult},
    provider::TxSenderProvider,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, Log, TxHash, U256},
    providers::{Provider, ext::AnvilApi},
    rpc::types::TransactionRequest,
};
use init4_bin_base::deps::tracing::{debug, instrument};
use std::future::Future;

/// ERC-20 metadata used when formatting balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMeta {
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
}

/// Read-only chain access needed by funding, supply and reporting.
pub trait ChainReader {
    /// Latest block number.
    fn block_number(&self) -> impl Future<Output = FusionResult<u64>> + Send;

    /// ERC-20 balance of `holder`.
    fn token_balance(
        &self,
        token: Address,
        holder: Address,
    ) -> impl Future<Output = FusionResult<U256>> + Send;

    /// ERC-20 symbol and decimals.
    fn token_meta(&self, token: Address) -> impl Future<Output = FusionResult<TokenMeta>> + Send;

    /// Deployed code at `account`.
    fn code_at(&self, account: Address) -> impl Future<Output = FusionResult<Bytes>> + Send;

    /// Next nonce of `account`.
    fn nonce(&self, account: Address) -> impl Future<Output = FusionResult<u64>> + Send;

    /// Logs emitted by a mined transaction.
    fn transaction_logs(&self, hash: TxHash) -> impl Future<Output = FusionResult<Vec<Log>>> + Send;
}

/// Debug controls of a local fork, used to borrow funds from donor accounts.
pub trait ForkControl: ChainReader {
    /// Let the node send transactions from `account` without its key.
    fn impersonate(&self, account: Address) -> impl Future<Output = FusionResult<()>> + Send;

    /// Revoke a previous [`ForkControl::impersonate`].
    fn stop_impersonating(&self, account: Address)
    -> impl Future<Output = FusionResult<()>> + Send;

    /// Overwrite the native balance of `account`.
    fn set_native_balance(
        &self,
        account: Address,
        amount: U256,
    ) -> impl Future<Output = FusionResult<()>> + Send;

    /// Send an ERC-20 transfer from an impersonated `from` and wait for it to mine.
    ///
    /// A missing or failed receipt is an error.
    fn transfer_as(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = FusionResult<TxHash>> + Send;
}

/// A connection to the forked chain.
#[derive(Debug, Clone)]
pub struct ForkNode {
    provider: TxSenderProvider,
}

impl ForkNode {
    /// Wrap a connected provider.
    pub const fn new(provider: TxSenderProvider) -> Self {
        Self { provider }
    }

    /// The underlying provider.
    pub const fn provider(&self) -> &TxSenderProvider {
        &self.provider
    }
}

impl ChainReader for ForkNode {
    async fn block_number(&self) -> FusionResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|err| FusionError::rpc("failed to read block number", err))
    }

    async fn token_balance(&self, token: Address, holder: Address) -> FusionResult<U256> {
        IERC20::new(token, &self.provider)
            .balanceOf(holder)
            .call()
            .await
            .map_err(|err| FusionError::contract(format!("balanceOf({holder}) on {token}"), err))
    }

    async fn token_meta(&self, token: Address) -> FusionResult<TokenMeta> {
        let erc20 = IERC20::new(token, &self.provider);
        let symbol = erc20
            .symbol()
            .call()
            .await
            .map_err(|err| FusionError::contract(format!("symbol() on {token}"), err))?;
        let decimals = erc20
            .decimals()
            .call()
            .await
            .map_err(|err| FusionError::contract(format!("decimals() on {token}"), err))?;
        Ok(TokenMeta { symbol, decimals })
    }

    async fn code_at(&self, account: Address) -> FusionResult<Bytes> {
        self.provider
            .get_code_at(account)
            .await
            .map_err(|err| FusionError::rpc(format!("failed to read code at {account}"), err))
    }

    async fn nonce(&self, account: Address) -> FusionResult<u64> {
        self.provider
            .get_transaction_count(account)
            .await
            .map_err(|err| FusionError::rpc(format!("failed to read nonce of {account}"), err))
    }

    async fn transaction_logs(&self, hash: TxHash) -> FusionResult<Vec<Log>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|err| FusionError::rpc(format!("failed to fetch receipt {hash}"), err))?
            .ok_or_else(|| {
                FusionError::infra(FailureKind::Unknown, format!("no receipt for {hash}"))
            })?;
        Ok(receipt.inner.logs().iter().map(|log| log.inner.clone()).collect())
    }
}

impl ForkControl for ForkNode {
    async fn impersonate(&self, account: Address) -> FusionResult<()> {
        self.provider
            .anvil_impersonate_account(account)
            .await
            .map_err(|err| FusionError::rpc(format!("failed to impersonate {account}"), err))
    }

    async fn stop_impersonating(&self, account: Address) -> FusionResult<()> {
        self.provider
            .anvil_stop_impersonating_account(account)
            .await
            .map_err(|err| {
                FusionError::rpc(format!("failed to stop impersonating {account}"), err)
            })
    }

    async fn set_native_balance(&self, account: Address, amount: U256) -> FusionResult<()> {
        self.provider
            .anvil_set_balance(account, amount)
            .await
            .map_err(|err| FusionError::rpc(format!("failed to set balance of {account}"), err))
    }

    #[instrument(skip(self))]
    async fn transfer_as(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> FusionResult<TxHash> {
        let erc20 = IERC20::new(token, self.provider.root());
        let tx: TransactionRequest =
            erc20.transfer(to, amount).into_transaction_request().with_from(from);

        // the root provider has no wallet, so the node signs for the impersonated sender
        let pending = self
            .provider
            .root()
            .send_transaction(tx)
            .await
            .map_err(|err| FusionError::rpc(format!("transfer from {from} was rejected"), err))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|err| FusionError::pending(format!("no receipt for transfer from {from}"), err))?;

        if !receipt.status() {
            return Err(FusionError::infra(
                FailureKind::Revert,
                format!("transfer from {from} reverted in {}", receipt.transaction_hash),
            ));
        }
        debug!(tx_hash = %receipt.transaction_hash, "donor transfer mined");
        Ok(receipt.transaction_hash)
    }
}
