use crate::error::{FailureKind, FusionError, FusionResult};
use alloy::{
    eips::eip7702::SignedAuthorization,
    primitives::{Address, B256, Bytes, TxHash, U256},
};
use init4_bin_base::deps::tracing::{debug, info, instrument, trace, warn};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt, future::Future, time::Duration};
use tokio::time::{Instant, sleep};

const API_KEY_HEADER: &str = "x-api-key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A chain the relay can execute on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedChain {
    /// The chain ID.
    pub chain_id: u64,
    /// Tokens accepted for fee payment on this chain. Empty when unrestricted.
    #[serde(default)]
    pub fee_tokens: Vec<Address>,
}

/// The relay's health/info response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    /// Relay version string.
    pub version: String,
    /// Chains the relay executes on.
    #[serde(default)]
    pub supported_chains: Vec<SupportedChain>,
    /// Smart-account implementation EOAs delegate to, if the relay uses delegation.
    #[serde(default)]
    pub delegation_implementation: Option<Address>,
}

impl RelayInfo {
    /// Support entry for `chain_id`, if any.
    pub fn chain(&self, chain_id: u64) -> Option<&SupportedChain> {
        self.supported_chains.iter().find(|chain| chain.chain_id == chain_id)
    }
}

/// A single contract call inside a fused transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDescriptor {
    /// Contract called.
    pub to: Address,
    /// Method name, for display.
    pub function_name: String,
    /// Method arguments, for display.
    pub args: Vec<String>,
    /// ABI-encoded calldata.
    pub data: Bytes,
    /// Native value sent with the call.
    pub value: U256,
}

/// A token on a given chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    /// Token address.
    pub address: Address,
    /// Chain the token lives on.
    pub chain_id: u64,
}

/// The asset movement that funds a fused transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Token pulled to fund execution.
    pub token_address: Address,
    /// Chain the token lives on.
    pub chain_id: u64,
    /// Amount of the token.
    pub amount: U256,
}

/// Request for a combined execution quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// The smart account executing the calls.
    pub account: Address,
    /// Chain to execute on.
    pub chain_id: u64,
    /// Calls, executed in order, all or nothing.
    pub calls: Vec<CallDescriptor>,
    /// Token the execution fee is paid in.
    pub fee_token: TokenRef,
    /// Asset movement funding the execution.
    pub trigger: Trigger,
    /// EIP-7702 delegation to install before execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<SignedAuthorization>,
}

/// Fee component of a [`Quote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteFee {
    /// Fee token.
    pub token: Address,
    /// Fee amount, in token base units.
    pub amount: U256,
}

/// A combined execution quote. Opaque relay fields are kept so the quote can
/// be sent back unchanged for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Hash the account owner signs to authorize execution.
    pub hash: B256,
    /// Execution fee.
    pub fee: QuoteFee,
    /// Remaining relay-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A signed quote, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// The quote, as received.
    pub quote: Quote,
    /// Owner signature over [`Quote::hash`].
    pub signature: Bytes,
}

/// Handle for an accepted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    /// Relay-side hash used to poll for the receipt.
    pub hash: B256,
}

/// Execution status reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Accepted, not yet submitted.
    Pending,
    /// Submitted, waiting to be mined.
    Mining,
    /// Mined and succeeded.
    Success,
    /// Mined and succeeded.
    MinedSuccess,
    /// Failed before mining.
    Failed,
    /// Mined and reverted.
    MinedFail,
    /// Status not recognised; keep polling.
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    /// Whether polling can stop.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::MinedSuccess | Self::Failed | Self::MinedFail)
    }

    /// Whether the execution succeeded.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::MinedSuccess)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Mining => "MINING",
            Self::Success => "SUCCESS",
            Self::MinedSuccess => "MINED_SUCCESS",
            Self::Failed => "FAILED",
            Self::MinedFail => "MINED_FAIL",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The relay's receipt for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    /// Relay-side hash.
    pub hash: B256,
    /// Current status.
    pub status: ExecutionStatus,
    /// Diagnostic text attached by the relay.
    #[serde(default)]
    pub message: Option<String>,
    /// On-chain transactions carrying the execution.
    #[serde(default)]
    pub transaction_hashes: Vec<TxHash>,
}

/// The relay operations used by the flow.
pub trait Relay {
    /// Health/info endpoint.
    fn info(&self) -> impl Future<Output = FusionResult<RelayInfo>> + Send;

    /// Request a combined execution quote.
    fn quote(&self, request: &QuoteRequest) -> impl Future<Output = FusionResult<Quote>> + Send;

    /// Execute a signed quote.
    fn execute(
        &self,
        request: &ExecuteRequest,
    ) -> impl Future<Output = FusionResult<ExecuteResponse>> + Send;

    /// Fetch the receipt of an execution.
    fn receipt(&self, hash: B256) -> impl Future<Output = FusionResult<ExecutionReceipt>> + Send;
}

/// HTTP client for the relay service.
#[derive(Debug, Clone)]
pub struct RelayClient {
    base: Url,
    client: Client,
    api_key: Option<String>,
}

impl RelayClient {
    /// Create a client for the relay at `base`.
    pub fn new(mut base: Url, api_key: Option<String>) -> FusionResult<Self> {
        // keep the last path segment when joining endpoint paths
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::ClientBuilder::new()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| FusionError::http("failed to build relay http client", err))?;
        info!(relay_url = base.as_str(), "Connecting to relay");
        Ok(Self { base, client, api_key })
    }

    /// The relay base URL.
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> FusionResult<Url> {
        self.base.join(path).map_err(|err| {
            FusionError::infra_with(FailureKind::Configuration, format!("bad relay path {path}"), err)
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FusionResult<T> {
        let url = self.endpoint(path)?;
        trace!(%url, "relay GET");
        let response = self
            .request(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|err| FusionError::http(format!("GET {url} failed"), err))?;
        Self::decode(&url, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> FusionResult<T> {
        let url = self.endpoint(path)?;
        trace!(%url, "relay POST");
        let response = self
            .request(self.client.post(url.clone()).json(body))
            .send()
            .await
            .map_err(|err| FusionError::http(format!("POST {url} failed"), err))?;
        Self::decode(&url, response).await
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: reqwest::Response) -> FusionResult<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| FusionError::http(format!("failed to read response from {url}"), err))?;
        trace!(%url, %status, body = %text, "relay response");
        if !status.is_success() {
            return Err(status_error(url, status, &text));
        }
        serde_json::from_str(&text).map_err(|err| {
            FusionError::infra_with(
                FailureKind::Unknown,
                format!("unexpected response from {url}: {text}"),
                err,
            )
        })
    }
}

fn status_error(url: &Url, status: StatusCode, body: &str) -> FusionError {
    FusionError::infra(
        FailureKind::from_http_status(status.as_u16()),
        format!("relay responded {status} to {url}: {body}"),
    )
}

impl Relay for RelayClient {
    async fn info(&self) -> FusionResult<RelayInfo> {
        self.get_json("info").await
    }

    async fn quote(&self, request: &QuoteRequest) -> FusionResult<Quote> {
        self.post_json("quote", request).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> FusionResult<ExecuteResponse> {
        self.post_json("exec", request).await
    }

    async fn receipt(&self, hash: B256) -> FusionResult<ExecutionReceipt> {
        self.get_json(&format!("explorer/{hash}")).await
    }
}

/// Poll the relay until `hash` reaches a terminal status.
///
/// A terminal failure becomes a transaction error carrying the relay's
/// diagnostic text. Transient lookup failures are polled through until the
/// deadline.
#[instrument(skip(relay))]
pub async fn wait_for_receipt<R: Relay>(
    relay: &R,
    hash: B256,
    interval: Duration,
    timeout: Duration,
) -> FusionResult<ExecutionReceipt> {
    let deadline = Instant::now() + timeout;
    loop {
        let receipt = match relay.receipt(hash).await {
            Ok(receipt) => receipt,
            Err(err) if err.kind().is_transient() && Instant::now() < deadline => {
                warn!(kind = %err.kind(), error = %err, "receipt lookup failed, polling again");
                sleep(interval).await;
                continue;
            }
            Err(err) => return Err(err),
        };
        debug!(status = %receipt.status, "polled execution receipt");

        if receipt.status.is_success() {
            info!(status = %receipt.status, "execution succeeded");
            return Ok(receipt);
        }
        if receipt.status.is_terminal() {
            let diagnostic = receipt.message.as_deref().unwrap_or("no diagnostic provided");
            return Err(FusionError::transaction(
                FailureKind::Revert,
                format!("relay reported {} for {hash}: {diagnostic}", receipt.status),
            ));
        }
        if Instant::now() >= deadline {
            return Err(FusionError::transaction(
                FailureKind::Unknown,
                format!(
                    "{hash} still {} after {}s",
                    receipt.status,
                    timeout.as_secs()
                ),
            ));
        }
        sleep(interval).await;
    }
}
