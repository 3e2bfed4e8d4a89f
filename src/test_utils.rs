//! In-memory chain and relay used by unit tests.

use crate::{
    chain::{ChainReader, ForkControl, TokenMeta},
    error::{FailureKind, FusionError, FusionResult},
    relay::{
        ExecuteRequest, ExecuteResponse, ExecutionReceipt, ExecutionStatus, Quote, QuoteFee,
        QuoteRequest, Relay, RelayInfo, SupportedChain,
    },
};
use alloy::primitives::{Address, B256, Bytes, Log, TxHash, U256};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

/// Address made of one repeated byte.
pub(crate) const fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[derive(Debug, Default)]
struct ChainState {
    block_number: u64,
    token_balances: HashMap<(Address, Address), U256>,
    token_meta: HashMap<Address, TokenMeta>,
    native_balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    logs: HashMap<TxHash, Vec<Log>>,
    balance_reads: Vec<(Address, Address)>,
    failing_holders: HashSet<Address>,
    fail_transfers: bool,
    skim: usize,
    transfers: Vec<(Address, Address, U256)>,
    impersonations: Vec<Address>,
    released: Vec<Address>,
    impersonated: HashSet<Address>,
}

/// A fork whose state lives in memory.
#[derive(Debug, Default)]
pub(crate) struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    fn with<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn set_block_number(&self, block_number: u64) {
        self.with(|s| s.block_number = block_number);
    }

    pub(crate) fn set_token_balance(&self, token: Address, holder: Address, amount: u64) {
        self.with(|s| s.token_balances.insert((token, holder), U256::from(amount)));
    }

    pub(crate) fn set_token_meta(&self, token: Address, meta: TokenMeta) {
        self.with(|s| s.token_meta.insert(token, meta));
    }

    pub(crate) fn set_nonce(&self, account: Address, nonce: u64) {
        self.with(|s| s.nonces.insert(account, nonce));
    }

    pub(crate) fn set_code(&self, account: Address, code: Vec<u8>) {
        self.with(|s| s.code.insert(account, code.into()));
    }

    pub(crate) fn set_transaction_logs(&self, hash: TxHash, logs: Vec<Log>) {
        self.with(|s| s.logs.insert(hash, logs));
    }

    /// Record the next `n` transfers without crediting the recipient.
    pub(crate) fn skim_next_transfers(&self, n: usize) {
        self.with(|s| s.skim = n);
    }

    pub(crate) fn fail_balance_reads_for(&self, holder: Address) {
        self.with(|s| s.failing_holders.insert(holder));
    }

    pub(crate) fn fail_transfers(&self) {
        self.with(|s| s.fail_transfers = true);
    }

    pub(crate) fn transfers(&self) -> Vec<(Address, Address, U256)> {
        self.with(|s| s.transfers.clone())
    }

    pub(crate) fn impersonations(&self) -> Vec<Address> {
        self.with(|s| s.impersonations.clone())
    }

    pub(crate) fn released(&self) -> Vec<Address> {
        self.with(|s| s.released.clone())
    }

    pub(crate) fn currently_impersonated(&self) -> Vec<Address> {
        self.with(|s| s.impersonated.iter().copied().collect())
    }

    /// Holders whose `token` balance was read, in order.
    pub(crate) fn balance_reads(&self, token: Address) -> Vec<Address> {
        self.with(|s| {
            s.balance_reads.iter().filter(|(t, _)| *t == token).map(|(_, holder)| *holder).collect()
        })
    }

    pub(crate) fn native_balance(&self, account: Address) -> U256 {
        self.with(|s| s.native_balances.get(&account).copied().unwrap_or_default())
    }
}

impl ChainReader for MockChain {
    async fn block_number(&self) -> FusionResult<u64> {
        Ok(self.with(|s| s.block_number))
    }

    async fn token_balance(&self, token: Address, holder: Address) -> FusionResult<U256> {
        self.with(|s| {
            s.balance_reads.push((token, holder));
            if s.failing_holders.contains(&holder) {
                return Err(FusionError::infra(
                    FailureKind::Connectivity,
                    format!("balance read for {holder} failed"),
                ));
            }
            Ok(s.token_balances.get(&(token, holder)).copied().unwrap_or_default())
        })
    }

    async fn token_meta(&self, token: Address) -> FusionResult<TokenMeta> {
        Ok(self.with(|s| {
            s.token_meta
                .get(&token)
                .cloned()
                .unwrap_or_else(|| TokenMeta { symbol: "TKN".into(), decimals: 6 })
        }))
    }

    async fn code_at(&self, account: Address) -> FusionResult<Bytes> {
        Ok(self.with(|s| s.code.get(&account).cloned().unwrap_or_default()))
    }

    async fn nonce(&self, account: Address) -> FusionResult<u64> {
        Ok(self.with(|s| s.nonces.get(&account).copied().unwrap_or_default()))
    }

    async fn transaction_logs(&self, hash: TxHash) -> FusionResult<Vec<Log>> {
        Ok(self.with(|s| s.logs.get(&hash).cloned().unwrap_or_default()))
    }
}

impl ForkControl for MockChain {
    async fn impersonate(&self, account: Address) -> FusionResult<()> {
        self.with(|s| {
            s.impersonations.push(account);
            s.impersonated.insert(account);
        });
        Ok(())
    }

    async fn stop_impersonating(&self, account: Address) -> FusionResult<()> {
        self.with(|s| {
            s.released.push(account);
            s.impersonated.remove(&account);
        });
        Ok(())
    }

    async fn set_native_balance(&self, account: Address, amount: U256) -> FusionResult<()> {
        self.with(|s| s.native_balances.insert(account, amount));
        Ok(())
    }

    async fn transfer_as(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> FusionResult<TxHash> {
        self.with(|s| {
            if !s.impersonated.contains(&from) {
                return Err(FusionError::infra(
                    FailureKind::Auth,
                    format!("{from} is not impersonated"),
                ));
            }
            if s.fail_transfers {
                return Err(FusionError::infra(
                    FailureKind::Revert,
                    format!("transfer from {from} reverted"),
                ));
            }
            s.transfers.push((from, to, amount));

            let from_balance = s.token_balances.entry((token, from)).or_default();
            *from_balance = from_balance.saturating_sub(amount);
            if s.skim > 0 {
                s.skim -= 1;
            } else {
                *s.token_balances.entry((token, to)).or_default() += amount;
            }
            Ok(B256::with_last_byte(s.transfers.len() as u8))
        })
    }
}

#[derive(Debug, Default)]
struct RelayState {
    info: Option<RelayInfo>,
    quote: Option<Quote>,
    quote_requests: Vec<QuoteRequest>,
    execute_requests: Vec<ExecuteRequest>,
    receipts: VecDeque<Result<ExecutionReceipt, FailureKind>>,
    last_receipt: Option<ExecutionReceipt>,
    receipt_polls: usize,
}

/// A relay answering from canned responses.
#[derive(Debug, Default)]
pub(crate) struct MockRelay {
    state: Mutex<RelayState>,
}

impl MockRelay {
    fn with<T>(&self, f: impl FnOnce(&mut RelayState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn with_info(info: RelayInfo) -> Self {
        let relay = Self::default();
        relay.with(|s| s.info = Some(info));
        relay
    }

    pub(crate) fn set_quote(&self, quote: Quote) {
        self.with(|s| s.quote = Some(quote));
    }

    /// Queue receipts. The last one keeps being returned once drained.
    pub(crate) fn push_receipts(&self, receipts: impl IntoIterator<Item = ExecutionReceipt>) {
        self.with(|s| s.receipts.extend(receipts.into_iter().map(Ok)));
    }

    /// Queue a failed receipt lookup of the given kind.
    pub(crate) fn fail_next_receipt(&self, kind: FailureKind) {
        self.with(|s| s.receipts.push_back(Err(kind)));
    }

    pub(crate) fn receipt_polls(&self) -> usize {
        self.with(|s| s.receipt_polls)
    }

    pub(crate) fn quote_requests(&self) -> Vec<QuoteRequest> {
        self.with(|s| s.quote_requests.clone())
    }

    pub(crate) fn execute_requests(&self) -> Vec<ExecuteRequest> {
        self.with(|s| s.execute_requests.clone())
    }
}

impl Relay for MockRelay {
    async fn info(&self) -> FusionResult<RelayInfo> {
        Ok(self.with(|s| {
            s.info.clone().unwrap_or_else(|| RelayInfo {
                version: "mock".into(),
                supported_chains: vec![SupportedChain { chain_id: 1, fee_tokens: vec![] }],
                delegation_implementation: None,
            })
        }))
    }

    async fn quote(&self, request: &QuoteRequest) -> FusionResult<Quote> {
        Ok(self.with(|s| {
            s.quote_requests.push(request.clone());
            s.quote.clone().unwrap_or_else(|| Quote {
                hash: B256::repeat_byte(0x33),
                fee: QuoteFee { token: request.fee_token.address, amount: U256::ZERO },
                extra: Default::default(),
            })
        }))
    }

    async fn execute(&self, request: &ExecuteRequest) -> FusionResult<ExecuteResponse> {
        self.with(|s| s.execute_requests.push(request.clone()));
        Ok(ExecuteResponse { hash: B256::repeat_byte(0x22) })
    }

    async fn receipt(&self, hash: B256) -> FusionResult<ExecutionReceipt> {
        self.with(|s| {
            s.receipt_polls += 1;
            match s.receipts.pop_front() {
                Some(Ok(next)) => s.last_receipt = Some(next),
                Some(Err(kind)) => {
                    return Err(FusionError::infra(kind, format!("receipt lookup for {hash} failed")));
                }
                None => {}
            }
            s.last_receipt.clone().ok_or_else(|| {
                FusionError::infra(FailureKind::Unknown, format!("no receipt for {hash}"))
            })
        })
    }
}

/// A successful receipt for the mock relay's execution hash.
pub(crate) fn mined(transaction_hashes: Vec<TxHash>) -> ExecutionReceipt {
    ExecutionReceipt {
        hash: B256::repeat_byte(0x22),
        status: ExecutionStatus::MinedSuccess,
        message: None,
        transaction_hashes,
    }
}
