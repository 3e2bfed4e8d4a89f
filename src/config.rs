use crate::retry::{RetryMode, RetryPolicy};
use alloy::{
    primitives::{Address, address},
    signers::{Signer, local::PrivateKeySigner},
};
use init4_bin_base::utils::from_env::{EnvItemInfo, FromEnv, FromEnvErr};
use reqwest::Url;
use std::{fmt, str::FromStr, time::Duration};

/// Mainnet USDC.
pub const DEFAULT_STABLECOIN: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
/// Mainnet Aave v3 pool.
pub const DEFAULT_LENDING_POOL: Address = address!("0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2");
/// Mainnet aEthUSDC.
pub const DEFAULT_RECEIPT_TOKEN: Address = address!("0x98C23E9d8f34FEFb1B7BD6a91B7FF122F4e16F5c");

/// Default donor candidates, in scan order. Large exchange wallets holding USDC on mainnet.
pub const DEFAULT_DONORS: [Address; 3] = [
    address!("0x28C6c06298d514Db089934071355E5743bf21d60"),
    address!("0xF977814e90dA44bFA03b6295A0616a897441aceC"),
    address!("0x55FE002aefF02F77364de339a1292923A15844B8"),
];

const DEFAULT_NODE_HOST: &str = "127.0.0.1";
const DEFAULT_NODE_PORT: u16 = 8545;
const DEFAULT_CHAIN_ID: u64 = 1;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// What went wrong with a single environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// A required variable was unset or empty.
    Missing,
    /// The variable was set but could not be parsed.
    Invalid(String),
}

/// A problem with one environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// The variable name.
    pub var: &'static str,
    /// What went wrong.
    pub problem: Problem,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Problem::Missing => write!(f, "{} is required but not set", self.var),
            Problem::Invalid(reason) => write!(f, "{} is invalid: {reason}", self.var),
        }
    }
}

/// Every configuration problem found while loading [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// All issues, in the order variables were checked.
    pub issues: Vec<ConfigIssue>,
}

impl ConfigError {
    /// Names of all offending variables.
    pub fn vars(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.issues.iter().map(|issue| issue.var)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid setting(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

impl From<FromEnvErr> for ConfigError {
    fn from(err: FromEnvErr) -> Self {
        let name = match &err {
            FromEnvErr::EnvError(var, _) | FromEnvErr::Empty(var) | FromEnvErr::ParseError(var, _) => {
                var.as_str()
            }
        };
        let var = EnvSettings::inventory()
            .into_iter()
            .map(|item| item.var)
            .find(|var| *var == name)
            .unwrap_or("environment");
        Self { issues: vec![ConfigIssue { var, problem: Problem::Invalid(err.to_string()) }] }
    }
}

/// Raw environment values, read through [`FromEnv`].
///
/// Required variables are still `Option`s so that every problem is reported
/// at once. [`FromEnv::check_inventory`] lists them as required.
#[derive(Debug, Clone, Default, FromEnv)]
pub struct EnvSettings {
    /// Relay base URL.
    #[from_env(var = "RELAY_URL", desc = "Relay base URL (http or https)")]
    pub relay_url: Option<String>,
    /// Relay API key.
    #[from_env(var = "RELAY_API_KEY", desc = "API key sent to the relay as x-api-key", optional)]
    pub relay_api_key: Option<String>,
    /// Upstream fork RPC.
    #[from_env(var = "FORK_URL", desc = "Upstream RPC the local fork is forked from")]
    pub fork_url: Option<String>,
    /// Signing key.
    #[from_env(var = "PRIVATE_KEY", desc = "32-byte hex signing key")]
    pub private_key: Option<String>,
    /// Fork node host.
    #[from_env(var = "NODE_HOST", desc = "Local fork node host", optional)]
    pub node_host: Option<String>,
    /// Fork node port.
    #[from_env(var = "NODE_PORT", desc = "Local fork node port", optional)]
    pub node_port: Option<String>,
    /// Expected chain ID.
    #[from_env(var = "CHAIN_ID", desc = "Expected chain ID", optional)]
    pub chain_id: Option<String>,
    /// Spawned fork block time.
    #[from_env(var = "BLOCK_TIME", desc = "Block time of a spawned fork, in seconds", optional)]
    pub block_time: Option<String>,
    /// Stablecoin address.
    #[from_env(var = "STABLECOIN_ADDRESS", desc = "Stablecoin supplied and paid as fee", optional)]
    pub stablecoin: Option<String>,
    /// Lending pool address.
    #[from_env(var = "LENDING_POOL_ADDRESS", desc = "Lending pool receiving the supply", optional)]
    pub lending_pool: Option<String>,
    /// Receipt token address.
    #[from_env(var = "RECEIPT_TOKEN_ADDRESS", desc = "Receipt token minted by the pool", optional)]
    pub receipt_token: Option<String>,
    /// Comma-separated, in scan order.
    #[from_env(var = "DONOR_ADDRESSES", desc = "Comma-separated donor addresses", optional)]
    pub donors: Option<String>,
    /// Retry attempt count.
    #[from_env(var = "RETRY_MAX_ATTEMPTS", desc = "Total attempts per retried stage", optional)]
    pub retry_max_attempts: Option<String>,
    /// First backoff delay.
    #[from_env(var = "RETRY_BASE_DELAY_MS", desc = "First backoff delay, in ms", optional)]
    pub retry_base_delay_ms: Option<String>,
    /// Backoff ceiling.
    #[from_env(var = "RETRY_MAX_DELAY_MS", desc = "Backoff ceiling, in ms", optional)]
    pub retry_max_delay_ms: Option<String>,
    /// `all` or `transient`.
    #[from_env(var = "RETRY_MODE", desc = "Retry eligibility: all or transient", optional)]
    pub retry_mode: Option<String>,
    /// Receipt polling interval.
    #[from_env(var = "RECEIPT_POLL_INTERVAL_MS", desc = "Relay receipt polling interval, in ms", optional)]
    pub receipt_poll_interval_ms: Option<String>,
    /// Receipt polling budget.
    #[from_env(var = "RECEIPT_TIMEOUT_SECS", desc = "Relay receipt polling budget, in seconds", optional)]
    pub receipt_timeout_secs: Option<String>,
}

/// Immutable run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay base URL.
    pub relay_url: Url,
    /// Optional relay API key, sent as `x-api-key`.
    pub relay_api_key: Option<String>,
    /// Upstream RPC the local fork is forked from.
    pub fork_url: Url,
    /// Local fork node host.
    pub node_host: String,
    /// Local fork node port.
    pub node_port: u16,
    /// Expected chain ID of the fork.
    pub chain_id: u64,
    /// Block time for a spawned fork. Instant mining when absent.
    pub block_time: Option<u64>,
    /// The wallet's signing key.
    pub signer: PrivateKeySigner,
    /// Stablecoin used for funding, fees and supply.
    pub stablecoin: Address,
    /// Lending pool receiving the supply.
    pub lending_pool: Address,
    /// Receipt token minted by the pool.
    pub receipt_token: Address,
    /// Donor candidates, in scan order.
    pub donors: Vec<Address>,
    /// Retry policy applied to each stage.
    pub retry: RetryPolicy,
    /// Relay receipt polling interval.
    pub poll_interval: Duration,
    /// Relay receipt polling budget.
    pub receipt_timeout: Duration,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Missing required variables come from [`FromEnv::check_inventory`];
    /// every other problem is collected while validating the values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let missing = EnvSettings::check_inventory().err().unwrap_or_default();
        let env = EnvSettings::from_env()?;
        Self::validate(env, &missing)
    }

    /// Validate raw values, collecting every problem before failing.
    pub fn from_raw(env: EnvSettings) -> Result<Self, ConfigError> {
        Self::validate(env, &[])
    }

    fn validate(env: EnvSettings, missing: &[&'static EnvItemInfo]) -> Result<Self, ConfigError> {
        let mut check = Checker {
            issues: missing
                .iter()
                .map(|item| ConfigIssue { var: item.var, problem: Problem::Missing })
                .collect(),
        };

        let relay_url = check.required("RELAY_URL", env.relay_url, parse_http_url);
        let relay_api_key = check.optional("RELAY_API_KEY", env.relay_api_key, |s| Ok(s.to_owned()));
        let fork_url = check.required("FORK_URL", env.fork_url, parse_http_url);
        let signer = check.required("PRIVATE_KEY", env.private_key, parse_signer);
        let node_host = check
            .optional("NODE_HOST", env.node_host, parse_host)
            .unwrap_or_else(|| DEFAULT_NODE_HOST.to_owned());
        let node_port =
            check.optional("NODE_PORT", env.node_port, parse_port).unwrap_or(DEFAULT_NODE_PORT);
        let chain_id =
            check.optional("CHAIN_ID", env.chain_id, parse_nonzero).unwrap_or(DEFAULT_CHAIN_ID);
        let block_time = check.optional("BLOCK_TIME", env.block_time, parse_nonzero);
        let stablecoin = check
            .optional("STABLECOIN_ADDRESS", env.stablecoin, parse_address)
            .unwrap_or(DEFAULT_STABLECOIN);
        let lending_pool = check
            .optional("LENDING_POOL_ADDRESS", env.lending_pool, parse_address)
            .unwrap_or(DEFAULT_LENDING_POOL);
        let receipt_token = check
            .optional("RECEIPT_TOKEN_ADDRESS", env.receipt_token, parse_address)
            .unwrap_or(DEFAULT_RECEIPT_TOKEN);
        let donors = check
            .optional("DONOR_ADDRESSES", env.donors, parse_address_list)
            .unwrap_or_else(|| DEFAULT_DONORS.to_vec());

        let defaults = RetryPolicy::default();
        let max_attempts = check
            .optional("RETRY_MAX_ATTEMPTS", env.retry_max_attempts, parse_attempts)
            .unwrap_or(defaults.max_attempts);
        let base_delay = check
            .optional("RETRY_BASE_DELAY_MS", env.retry_base_delay_ms, parse_millis)
            .unwrap_or(defaults.base_delay);
        let max_delay = check
            .optional("RETRY_MAX_DELAY_MS", env.retry_max_delay_ms, parse_millis)
            .unwrap_or(defaults.max_delay);
        let mode = check
            .optional("RETRY_MODE", env.retry_mode, RetryMode::from_str)
            .unwrap_or(defaults.mode);
        if max_delay < base_delay {
            check.issues.push(ConfigIssue {
                var: "RETRY_MAX_DELAY_MS",
                problem: Problem::Invalid("ceiling is below RETRY_BASE_DELAY_MS".into()),
            });
        }

        let poll_interval = check
            .optional("RECEIPT_POLL_INTERVAL_MS", env.receipt_poll_interval_ms, parse_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let receipt_timeout = check
            .optional("RECEIPT_TIMEOUT_SECS", env.receipt_timeout_secs, |s| {
                parse_nonzero(s).map(Duration::from_secs)
            })
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT);

        match (relay_url, fork_url, signer) {
            (Some(relay_url), Some(fork_url), Some(signer)) if check.issues.is_empty() => Ok(Self {
                relay_url,
                relay_api_key,
                fork_url,
                node_host,
                node_port,
                chain_id,
                block_time,
                signer: signer.with_chain_id(Some(chain_id)),
                stablecoin,
                lending_pool,
                receipt_token,
                donors,
                retry: RetryPolicy { max_attempts, base_delay, max_delay, mode },
                poll_interval,
                receipt_timeout,
            }),
            _ => Err(ConfigError { issues: check.issues }),
        }
    }

    /// JSON-RPC URL of the local fork node.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.node_host, self.node_port)
    }

    /// The wallet address.
    pub fn wallet(&self) -> Address {
        self.signer.address()
    }
}

/// Typed checks over raw values, collecting issues.
struct Checker {
    issues: Vec<ConfigIssue>,
}

impl Checker {
    fn present(value: Option<String>) -> Option<String> {
        value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
    }

    fn required<T>(
        &mut self,
        var: &'static str,
        value: Option<String>,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Option<T> {
        match Self::present(value) {
            Some(value) => self.parsed(var, &value, parse),
            None => {
                // may already be listed by the inventory check
                if !self.issues.iter().any(|issue| issue.var == var) {
                    self.issues.push(ConfigIssue { var, problem: Problem::Missing });
                }
                None
            }
        }
    }

    fn optional<T>(
        &mut self,
        var: &'static str,
        value: Option<String>,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Option<T> {
        let value = Self::present(value)?;
        self.parsed(var, &value, parse)
    }

    fn parsed<T>(
        &mut self,
        var: &'static str,
        value: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Option<T> {
        parse(value)
            .map_err(|reason| self.issues.push(ConfigIssue { var, problem: Problem::Invalid(reason) }))
            .ok()
    }
}

fn parse_http_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err("missing host".into()),
        other => Err(format!("unsupported scheme {other:?}, expected http or https")),
    }
}

fn parse_signer(s: &str) -> Result<PrivateKeySigner, String> {
    // never echo the key back
    PrivateKeySigner::from_str(s).map_err(|_| "not a 32-byte hex private key".to_owned())
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|e| format!("{s:?} is not an address: {e}"))
}

fn parse_address_list(s: &str) -> Result<Vec<Address>, String> {
    s.split(',').map(str::trim).filter(|part| !part.is_empty()).map(parse_address).collect()
}

fn parse_host(s: &str) -> Result<String, String> {
    if s.contains(['/', ':', ' ']) {
        return Err(format!("{s:?} is not a bare host name"));
    }
    Ok(s.to_owned())
}

fn parse_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(0) => Err("port must be non-zero".into()),
        Ok(port) => Ok(port),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_nonzero(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("must be greater than zero".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_attempts(s: &str) -> Result<u32, String> {
    let n = parse_nonzero(s)?;
    u32::try_from(n).map_err(|_| format!("{n} exceeds the maximum of {}", u32::MAX))
}

fn parse_millis(s: &str) -> Result<Duration, String> {
    parse_nonzero(s).map(Duration::from_millis)
}
