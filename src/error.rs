use alloy::{
    contract::Error as ContractError,
    providers::PendingTransactionError,
    transports::{RpcError, TransportErrorKind},
};
use std::fmt;

/// Boxed cause carried by [`FusionError`] variants.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type FusionResult<T> = Result<T, FusionError>;

/// Well-defined failure causes, each mapped to remediation advice by
/// [`FailureKind::remediation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A dependent service could not be reached.
    Connectivity,
    /// A contract call or the fused transaction reverted.
    Revert,
    /// The wallet cannot cover gas or the relay fee.
    InsufficientGas,
    /// A service rejected our credentials.
    Auth,
    /// A service throttled us.
    RateLimit,
    /// Invalid or missing configuration.
    Configuration,
    /// Funding completed but the wallet is still below its target.
    Shortfall,
    /// Anything we could not attribute.
    Unknown,
}

impl FailureKind {
    /// Remediation suggestions for this failure cause.
    pub const fn remediation(self) -> &'static [&'static str] {
        match self {
            Self::Connectivity => &[
                "check that the local fork node is running at NODE_HOST:NODE_PORT",
                "check that the relay service is running and reachable at RELAY_URL",
            ],
            Self::Revert => &[
                "check the wallet's stablecoin balance and its allowance for the lending pool",
                "confirm the contract addresses belong to the forked network",
            ],
            Self::InsufficientGas => &[
                "fund the wallet with more stablecoin to cover the relay fee",
                "lower the supplied amount so the fee fits in the remaining balance",
            ],
            Self::Auth => &["check RELAY_API_KEY and the relay's access rules"],
            Self::RateLimit => &[
                "wait a little and retry",
                "switch to a different RPC or relay provider",
            ],
            Self::Configuration => &["fix the environment variables listed above"],
            Self::Shortfall => &[
                "the stablecoin may charge a transfer fee, fund the wallet manually",
                "add donors holding enough stablecoin via DONOR_ADDRESSES",
            ],
            Self::Unknown => &["re-run with RUST_LOG=debug for more detail"],
        }
    }

    /// Whether a failure of this kind may clear up on its own.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Connectivity | Self::RateLimit)
    }

    /// Whether repeating the failed operation would repeat its side effects
    /// without changing the outcome. Never retried, in any mode.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Shortfall)
    }

    /// Classify an HTTP status code.
    pub const fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            402 => Self::InsufficientGas,
            429 => Self::RateLimit,
            502..=504 => Self::Connectivity,
            _ => Self::Unknown,
        }
    }

    /// Classify a JSON-RPC error code.
    pub const fn from_rpc_code(code: i64) -> Self {
        match code {
            // EIP-1474 revert data / execution reverted
            3 | -32015 => Self::Revert,
            // EIP-1474 limit exceeded
            -32005 | 429 => Self::RateLimit,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connectivity => "connectivity",
            Self::Revert => "revert",
            Self::InsufficientGas => "insufficient gas",
            Self::Auth => "auth",
            Self::RateLimit => "rate limit",
            Self::Configuration => "configuration",
            Self::Shortfall => "funding shortfall",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by every stage of the fusion flow.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Configuration was missing or malformed. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The fork node or the relay was unreachable, or funding failed.
    #[error("infrastructure error: {message}")]
    Infrastructure {
        /// Human-readable description.
        message: String,
        /// Failure cause used for remediation advice.
        kind: FailureKind,
        /// Underlying error, if any.
        #[source]
        source: Option<BoxedCause>,
    },

    /// The fused transaction reverted or the relay reported a failure.
    #[error("transaction error: {message}")]
    Transaction {
        /// Human-readable description.
        message: String,
        /// Failure cause used for remediation advice.
        kind: FailureKind,
        /// Underlying error, if any.
        #[source]
        source: Option<BoxedCause>,
    },

    /// A retried operation gave up.
    #[error("{operation} failed after {attempts} attempt(s): {source}{}", render_suggestions(.suggestions))]
    Exhausted {
        /// Name of the wrapped operation.
        operation: &'static str,
        /// Number of invocations made.
        attempts: u32,
        /// Remediation advice for the final failure.
        suggestions: &'static [&'static str],
        /// The final failure.
        #[source]
        source: Box<FusionError>,
    },
}

fn render_suggestions(suggestions: &[&str]) -> String {
    suggestions.iter().fold(String::new(), |mut out, hint| {
        out.push_str("\n  - ");
        out.push_str(hint);
        out
    })
}

impl FusionError {
    /// Infrastructure error without an underlying cause.
    pub fn infra(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Infrastructure { message: message.into(), kind, source: None }
    }

    /// Infrastructure error wrapping a cause.
    pub fn infra_with(
        kind: FailureKind,
        message: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::Infrastructure { message: message.into(), kind, source: Some(source.into()) }
    }

    /// Transaction error without an underlying cause.
    pub fn transaction(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Transaction { message: message.into(), kind, source: None }
    }

    /// The failure cause of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Configuration,
            Self::Infrastructure { kind, .. } | Self::Transaction { kind, .. } => *kind,
            Self::Exhausted { source, .. } => source.kind(),
        }
    }

    /// Remediation suggestions for this error.
    pub fn suggestions(&self) -> &'static [&'static str] {
        self.kind().remediation()
    }

    /// Wrap a transport error from the fork node.
    pub fn rpc(context: impl Into<String>, err: RpcError<TransportErrorKind>) -> Self {
        let kind = classify_transport(&err);
        Self::infra_with(kind, context, err)
    }

    /// Wrap a contract call error from the fork node.
    pub fn contract(context: impl Into<String>, err: ContractError) -> Self {
        let kind = match &err {
            ContractError::TransportError(inner) => classify_transport(inner),
            _ => FailureKind::Unknown,
        };
        Self::infra_with(kind, context, err)
    }

    /// Wrap a failure while waiting on a pending transaction.
    pub fn pending(context: impl Into<String>, err: PendingTransactionError) -> Self {
        let kind = match &err {
            PendingTransactionError::TransportError(inner) => classify_transport(inner),
            _ => FailureKind::Connectivity,
        };
        Self::infra_with(kind, context, err)
    }

    /// Wrap an HTTP client error from the relay.
    pub fn http(context: impl Into<String>, err: reqwest::Error) -> Self {
        let kind = if err.is_connect() || err.is_timeout() {
            FailureKind::Connectivity
        } else if let Some(status) = err.status() {
            FailureKind::from_http_status(status.as_u16())
        } else {
            FailureKind::Unknown
        };
        Self::infra_with(kind, context, err)
    }
}

/// Classify a transport-level RPC failure by its structure.
pub fn classify_transport(err: &RpcError<TransportErrorKind>) -> FailureKind {
    match err {
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            FailureKind::from_http_status(http.status)
        }
        RpcError::Transport(_) => FailureKind::Connectivity,
        RpcError::ErrorResp(payload) => FailureKind::from_rpc_code(payload.code),
        _ => FailureKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses_map_to_kinds() {
        assert_eq!(FailureKind::from_http_status(429), FailureKind::RateLimit);
        assert_eq!(FailureKind::from_http_status(401), FailureKind::Auth);
        assert_eq!(FailureKind::from_http_status(503), FailureKind::Connectivity);
        assert_eq!(FailureKind::from_http_status(500), FailureKind::Unknown);
    }

    #[test]
    fn rpc_codes_map_to_kinds() {
        assert_eq!(FailureKind::from_rpc_code(3), FailureKind::Revert);
        assert_eq!(FailureKind::from_rpc_code(-32005), FailureKind::RateLimit);
        assert_eq!(FailureKind::from_rpc_code(-32601), FailureKind::Unknown);
    }

    #[test]
    fn every_kind_has_advice() {
        for kind in [
            FailureKind::Connectivity,
            FailureKind::Revert,
            FailureKind::InsufficientGas,
            FailureKind::Auth,
            FailureKind::RateLimit,
            FailureKind::Configuration,
            FailureKind::Shortfall,
            FailureKind::Unknown,
        ] {
            assert!(!kind.remediation().is_empty(), "{kind} has no advice");
        }
    }

    #[test]
    fn only_shortfall_is_final() {
        assert!(FailureKind::Shortfall.is_final());
        assert!(!FailureKind::Shortfall.is_transient());
        assert!(!FailureKind::Unknown.is_final());
        assert!(!FailureKind::Connectivity.is_final());
    }

    #[test]
    fn exhausted_message_names_operation_and_lists_advice() {
        let err = FusionError::Exhausted {
            operation: "connect",
            attempts: 3,
            suggestions: FailureKind::Connectivity.remediation(),
            source: Box::new(FusionError::infra(FailureKind::Connectivity, "refused")),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("connect failed after 3 attempt(s)"));
        assert!(msg.contains("infrastructure error: refused"));
        assert!(msg.contains("\n  - check that the local fork node"));
        assert_eq!(err.kind(), FailureKind::Connectivity);
    }
}
