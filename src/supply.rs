use crate::{
    account::SmartAccount,
    chain::ChainReader,
    contracts::{IERC20, ILendingPool},
    error::{FailureKind, FusionError, FusionResult},
    relay::{
        CallDescriptor, ExecuteRequest, QuoteRequest, Relay, TokenRef, Trigger, wait_for_receipt,
    },
    report::{BalanceSnapshot, TransactionResult, take_snapshot},
};
use alloy::{
    primitives::{Address, Log, TxHash, U256},
    sol_types::{SolCall, SolEvent},
};
use init4_bin_base::deps::tracing::{debug, info, instrument, warn};
use std::time::Duration;

/// Referral code passed to the pool's `supply`.
const REFERRAL_CODE: u16 = 0;

/// Contracts and policy for a fused approve + supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyPlan {
    /// Stablecoin supplied and used to pay the fee.
    pub stablecoin: Address,
    /// Lending pool receiving the supply.
    pub lending_pool: Address,
    /// Receipt token minted by the pool.
    pub receipt_token: Address,
    /// Refuse to run below this stablecoin balance.
    pub min_balance: U256,
    /// Relay receipt polling interval.
    pub poll_interval: Duration,
    /// Relay receipt polling budget.
    pub receipt_timeout: Duration,
}

/// Amount acted on: half the balance, remainder discarded.
pub fn supply_amount(balance: U256) -> U256 {
    balance / U256::from(2)
}

/// The two calls of a fused supply, in execution order: approve, then supply.
pub fn build_calls(plan: &SupplyPlan, on_behalf_of: Address, amount: U256) -> Vec<CallDescriptor> {
    let approve = IERC20::approveCall { spender: plan.lending_pool, amount };
    let supply = ILendingPool::supplyCall {
        asset: plan.stablecoin,
        amount,
        onBehalfOf: on_behalf_of,
        referralCode: REFERRAL_CODE,
    };
    vec![
        CallDescriptor {
            to: plan.stablecoin,
            function_name: "approve".into(),
            args: vec![plan.lending_pool.to_string(), amount.to_string()],
            data: approve.abi_encode().into(),
            value: U256::ZERO,
        },
        CallDescriptor {
            to: plan.lending_pool,
            function_name: "supply".into(),
            args: vec![
                plan.stablecoin.to_string(),
                amount.to_string(),
                on_behalf_of.to_string(),
                REFERRAL_CODE.to_string(),
            ],
            data: supply.abi_encode().into(),
            value: U256::ZERO,
        },
    ]
}

/// Sum of `token` transfers to `recipient` found in `logs`.
pub fn received_from_logs<'a>(
    logs: impl IntoIterator<Item = &'a Log>,
    token: Address,
    recipient: Address,
) -> U256 {
    logs.into_iter()
        .filter(|log| log.address == token)
        .filter_map(|log| IERC20::Transfer::decode_log(log).ok())
        .filter(|transfer| transfer.data.to == recipient)
        .fold(U256::ZERO, |total, transfer| total.saturating_add(transfer.data.value))
}

/// Submits a fused approve + supply through the relay.
#[derive(Debug)]
pub struct FusionSupply<'a, C, R> {
    chain: &'a C,
    relay: &'a R,
    account: &'a SmartAccount,
    plan: SupplyPlan,
}

impl<'a, C, R> FusionSupply<'a, C, R>
where
    C: ChainReader + Sync,
    R: Relay + Sync,
{
    /// Create a new orchestrator.
    pub const fn new(chain: &'a C, relay: &'a R, account: &'a SmartAccount, plan: SupplyPlan) -> Self {
        Self { chain, relay, account, plan }
    }

    fn tracked_tokens(&self) -> [Address; 2] {
        [self.plan.stablecoin, self.plan.receipt_token]
    }

    /// Supply half the stablecoin balance to the pool in one fused transaction.
    /// - Snapshots balances
    /// - Builds the approve and supply calls
    /// - Quotes, signs and executes them through the relay
    /// - Waits for the relay receipt and snapshots balances again
    #[instrument(skip_all, fields(account = %self.account.address()))]
    pub async fn supply_half(&self) -> FusionResult<TransactionResult> {
        let wallet = self.account.address();
        let before = take_snapshot(self.chain, wallet, &self.tracked_tokens()).await?;
        let balance = before.raw(self.plan.stablecoin);

        if balance < self.plan.min_balance {
            return Err(FusionError::transaction(
                FailureKind::InsufficientGas,
                format!(
                    "refusing to supply: balance {balance} is below the minimum {}",
                    self.plan.min_balance
                ),
            ));
        }
        let amount = supply_amount(balance);
        info!(%balance, %amount, "supplying half of the stablecoin balance");

        let calls = build_calls(&self.plan, wallet, amount);
        debug!(?calls, "fused calls");

        let request = QuoteRequest {
            account: wallet,
            chain_id: self.account.chain_id(),
            calls,
            fee_token: TokenRef { address: self.plan.stablecoin, chain_id: self.account.chain_id() },
            trigger: Trigger {
                token_address: self.plan.stablecoin,
                chain_id: self.account.chain_id(),
                amount,
            },
            authorization: self.account.authorization().cloned(),
        };
        let quote = self.relay.quote(&request).await?;
        info!(quote_hash = %quote.hash, fee = %quote.fee.amount, "received quote");

        let left_for_fee = balance - amount;
        if quote.fee.token == self.plan.stablecoin && quote.fee.amount > left_for_fee {
            return Err(FusionError::transaction(
                FailureKind::InsufficientGas,
                format!("fee {} exceeds the {left_for_fee} left after supplying", quote.fee.amount),
            ));
        }

        let signature = self.account.sign_quote(&quote)?;
        let executed = self.relay.execute(&ExecuteRequest { quote, signature }).await?;
        info!(hash = %executed.hash, "fused transaction submitted");

        let receipt = wait_for_receipt(
            self.relay,
            executed.hash,
            self.plan.poll_interval,
            self.plan.receipt_timeout,
        )
        .await?;

        let after = take_snapshot(self.chain, wallet, &self.tracked_tokens()).await?;
        let received = self.received(&receipt.transaction_hashes, &before, &after).await?;
        info!(%amount, %received, "supply complete");

        Ok(TransactionResult {
            hash: executed.hash,
            success: receipt.status.is_success(),
            stablecoin: self.plan.stablecoin,
            receipt_token: self.plan.receipt_token,
            supplied: amount,
            received,
            before,
            after,
        })
    }

    /// Receipt tokens credited to the wallet, decoded from the execution's
    /// transfer logs. Falls back to the snapshot delta when the relay did
    /// not report the carrying transactions.
    async fn received(
        &self,
        tx_hashes: &[TxHash],
        before: &BalanceSnapshot,
        after: &BalanceSnapshot,
    ) -> FusionResult<U256> {
        let wallet = self.account.address();
        if tx_hashes.is_empty() {
            warn!("relay reported no transaction hashes, using balance delta");
            let token = self.plan.receipt_token;
            return Ok(after.raw(token).saturating_sub(before.raw(token)));
        }

        let mut received = U256::ZERO;
        for hash in tx_hashes {
            let logs = self.chain.transaction_logs(*hash).await?;
            received += received_from_logs(&logs, self.plan.receipt_token, wallet);
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::initialize_account,
        relay::{ExecutionReceipt, ExecutionStatus, Quote, QuoteFee},
        test_utils::{MockChain, MockRelay, addr, mined},
    };
    use alloy::{
        primitives::{B256, LogData, Signature},
        signers::local::PrivateKeySigner,
    };

    fn plan() -> SupplyPlan {
        SupplyPlan {
            stablecoin: addr(0xaa),
            lending_pool: addr(0xbb),
            receipt_token: addr(0xcc),
            min_balance: U256::from(10),
            poll_interval: Duration::from_millis(1),
            receipt_timeout: Duration::from_secs(5),
        }
    }

    fn transfer_log(token: Address, from: Address, to: Address, value: u64) -> Log {
        let event = IERC20::Transfer { from, to, value: U256::from(value) };
        Log { address: token, data: event.encode_log_data() }
    }

    #[test]
    fn acts_on_half_the_balance() {
        assert_eq!(supply_amount(U256::from(101)), U256::from(50));
        assert_eq!(supply_amount(U256::from(100)), U256::from(50));
        assert_eq!(supply_amount(U256::from(1)), U256::ZERO);
    }

    #[test]
    fn approve_is_built_before_supply() {
        let wallet = addr(0x01);
        let calls = build_calls(&plan(), wallet, U256::from(50));

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function_name, "approve");
        assert_eq!(calls[0].to, addr(0xaa));
        assert_eq!(calls[1].function_name, "supply");
        assert_eq!(calls[1].to, addr(0xbb));

        let approve = IERC20::approveCall::abi_decode(&calls[0].data).unwrap();
        assert_eq!(approve.spender, addr(0xbb));
        assert_eq!(approve.amount, U256::from(50));

        let supply = ILendingPool::supplyCall::abi_decode(&calls[1].data).unwrap();
        assert_eq!(supply.asset, addr(0xaa));
        assert_eq!(supply.amount, U256::from(50));
        assert_eq!(supply.onBehalfOf, wallet);
    }

    #[test]
    fn decodes_received_amount_from_logs() {
        let wallet = addr(0x01);
        let logs = vec![
            // stablecoin leaving the wallet
            transfer_log(addr(0xaa), wallet, addr(0xbb), 50),
            // receipt token minted to the wallet
            transfer_log(addr(0xcc), Address::ZERO, wallet, 49),
            // receipt token minted elsewhere
            transfer_log(addr(0xcc), Address::ZERO, addr(0x02), 7),
            Log { address: addr(0xcc), data: LogData::new_unchecked(vec![], Default::default()) },
        ];

        assert_eq!(received_from_logs(&logs, addr(0xcc), wallet), U256::from(49));
    }

    async fn account(relay: &MockRelay, chain: &MockChain) -> SmartAccount {
        let signer = PrivateKeySigner::random();
        initialize_account(relay, chain, &signer, 1, addr(0xaa)).await.unwrap().1
    }

    #[tokio::test]
    async fn supplies_half_in_one_execution() {
        let chain = MockChain::default();
        let relay = MockRelay::default();
        let account = account(&relay, &chain).await;
        let wallet = account.address();
        chain.set_token_balance(addr(0xaa), wallet, 101);
        let carrier = B256::repeat_byte(0x55);
        chain.set_transaction_logs(carrier, vec![transfer_log(addr(0xcc), Address::ZERO, wallet, 50)]);
        relay.push_receipts([mined(vec![carrier])]);

        let result = FusionSupply::new(&chain, &relay, &account, plan()).supply_half().await.unwrap();

        assert!(result.success);
        assert_eq!(result.supplied, U256::from(50));
        assert_eq!(result.received, U256::from(50));
        assert_eq!(result.hash, B256::repeat_byte(0x22));

        let quotes = relay.quote_requests();
        assert_eq!(quotes.len(), 1);
        let names: Vec<_> = quotes[0].calls.iter().map(|c| c.function_name.as_str()).collect();
        assert_eq!(names, ["approve", "supply"]);
        assert_eq!(quotes[0].trigger.amount, U256::from(50));
        assert_eq!(quotes[0].fee_token.address, addr(0xaa));

        let executed = relay.execute_requests();
        assert_eq!(executed.len(), 1);
        let signature = Signature::try_from(executed[0].signature.as_ref()).unwrap();
        assert_eq!(
            signature.recover_address_from_prehash(&executed[0].quote.hash).unwrap(),
            wallet
        );
    }

    #[tokio::test]
    async fn below_minimum_stops_before_quoting() {
        let chain = MockChain::default();
        let relay = MockRelay::default();
        let account = account(&relay, &chain).await;
        chain.set_token_balance(addr(0xaa), account.address(), 9);

        let err = FusionSupply::new(&chain, &relay, &account, plan()).supply_half().await.unwrap_err();

        assert!(err.to_string().contains("below the minimum 10"), "{err}");
        assert!(relay.quote_requests().is_empty());
    }

    #[tokio::test]
    async fn fee_above_remainder_is_rejected() {
        let chain = MockChain::default();
        let relay = MockRelay::default();
        let account = account(&relay, &chain).await;
        chain.set_token_balance(addr(0xaa), account.address(), 100);
        relay.set_quote(Quote {
            hash: B256::repeat_byte(0x33),
            fee: QuoteFee { token: addr(0xaa), amount: U256::from(51) },
            extra: Default::default(),
        });

        let err = FusionSupply::new(&chain, &relay, &account, plan()).supply_half().await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::InsufficientGas);
        assert!(relay.execute_requests().is_empty());
    }

    #[tokio::test]
    async fn relay_failure_is_a_transaction_error() {
        let chain = MockChain::default();
        let relay = MockRelay::default();
        let account = account(&relay, &chain).await;
        chain.set_token_balance(addr(0xaa), account.address(), 100);
        relay.push_receipts([ExecutionReceipt {
            hash: B256::repeat_byte(0x22),
            status: ExecutionStatus::Failed,
            message: Some("insufficient allowance".into()),
            transaction_hashes: vec![],
        }]);

        let err = FusionSupply::new(&chain, &relay, &account, plan()).supply_half().await.unwrap_err();

        assert!(matches!(err, FusionError::Transaction { .. }));
        assert!(err.to_string().contains("insufficient allowance"));
    }

    #[tokio::test]
    async fn missing_hashes_fall_back_to_balance_delta() {
        let chain = MockChain::default();
        let relay = MockRelay::default();
        let account = account(&relay, &chain).await;
        chain.set_token_balance(addr(0xaa), account.address(), 100);
        relay.push_receipts([mined(vec![])]);

        let result = FusionSupply::new(&chain, &relay, &account, plan()).supply_half().await.unwrap();

        // the mock relay does not move balances
        assert_eq!(result.received, U256::ZERO);
        assert_eq!(result.before.raw(addr(0xaa)), result.after.raw(addr(0xaa)));
    }
}
