use crate::{
    chain::ChainReader,
    error::{FailureKind, FusionError, FusionResult},
    relay::{Quote, Relay, RelayInfo},
};
use alloy::{
    eips::eip7702::{Authorization, SignedAuthorization},
    primitives::{Address, Bytes, U256},
    signers::{SignerSync, local::PrivateKeySigner},
};
use init4_bin_base::deps::tracing::{debug, info, instrument};

/// Code prefix of an EIP-7702 delegation designator.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

/// The address an EOA's code delegates to, if the code is a 7702 designator.
pub fn delegation_target(code: &[u8]) -> Option<Address> {
    match code.strip_prefix(&DELEGATION_PREFIX[..]) {
        Some(target) if target.len() == 20 => Some(Address::from_slice(target)),
        _ => None,
    }
}

/// A smart-account handle: the signer's EOA, delegated to the relay's
/// account implementation.
#[derive(Debug, Clone)]
pub struct SmartAccount {
    signer: PrivateKeySigner,
    chain_id: u64,
    implementation: Option<Address>,
    authorization: Option<SignedAuthorization>,
}

impl SmartAccount {
    /// The account address, which is the signer's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Chain the account executes on.
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Implementation the account delegates to, if any.
    pub const fn implementation(&self) -> Option<Address> {
        self.implementation
    }

    /// Pending delegation to attach to the next quote request.
    pub const fn authorization(&self) -> Option<&SignedAuthorization> {
        self.authorization.as_ref()
    }

    /// Whether the delegation is already installed on chain.
    pub const fn is_delegated(&self) -> bool {
        self.implementation.is_some() && self.authorization.is_none()
    }

    /// Sign a quote hash, authorizing its execution.
    pub fn sign_quote(&self, quote: &Quote) -> FusionResult<Bytes> {
        let signature = self.signer.sign_hash_sync(&quote.hash).map_err(|err| {
            FusionError::infra_with(FailureKind::Unknown, "failed to sign quote", err)
        })?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

/// Check the relay is reachable and usable for this run, then build the
/// smart-account handle.
#[instrument(skip(relay, chain, signer), fields(account = %signer.address()))]
pub async fn initialize_account<R, C>(
    relay: &R,
    chain: &C,
    signer: &PrivateKeySigner,
    chain_id: u64,
    fee_token: Address,
) -> FusionResult<(RelayInfo, SmartAccount)>
where
    R: Relay,
    C: ChainReader,
{
    let info = relay.info().await?;
    info!(version = %info.version, "relay reachable");

    let supported = info.chain(chain_id).ok_or_else(|| {
        FusionError::infra(
            FailureKind::Configuration,
            format!("relay {} does not support chain {chain_id}", info.version),
        )
    })?;
    if !supported.fee_tokens.is_empty() && !supported.fee_tokens.contains(&fee_token) {
        return Err(FusionError::infra(
            FailureKind::Configuration,
            format!("relay does not accept {fee_token} as fee token on chain {chain_id}"),
        ));
    }

    let address = signer.address();
    let authorization = match info.delegation_implementation {
        Some(implementation) => {
            let code = chain.code_at(address).await?;
            if delegation_target(&code) == Some(implementation) {
                debug!(%implementation, "account already delegated");
                None
            } else {
                let nonce = chain.nonce(address).await?;
                Some(authorize(signer, chain_id, implementation, nonce)?)
            }
        }
        None => None,
    };

    let account = SmartAccount {
        signer: signer.clone(),
        chain_id,
        implementation: info.delegation_implementation,
        authorization,
    };
    info!(
        delegated = account.is_delegated(),
        pending_authorization = account.authorization.is_some(),
        "smart account ready"
    );
    Ok((info, account))
}

/// Sign an EIP-7702 authorization delegating the signer's EOA to `implementation`.
fn authorize(
    signer: &PrivateKeySigner,
    chain_id: u64,
    implementation: Address,
    nonce: u64,
) -> FusionResult<SignedAuthorization> {
    let authorization = Authorization { chain_id: U256::from(chain_id), address: implementation, nonce };
    let signature = signer.sign_hash_sync(&authorization.signature_hash()).map_err(|err| {
        FusionError::infra_with(FailureKind::Unknown, "failed to sign delegation", err)
    })?;
    debug!(%implementation, nonce, "signed delegation authorization");
    Ok(authorization.into_signed(signature))
}
