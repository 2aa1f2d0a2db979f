// Signature Issuance Service - signs reward claims for on-chain redemption.
//
// Payload specification (CRITICAL - must match the claim contract):
//   message = SHA256(recipient_pubkey_32 || token_mint_32 || amount_u64_le)
//   signature = ed25519_sign(signer_secret, message)
//
// The contract is provisioned with the signer's public key and releases the
// tokens only for a payload whose signature verifies, so every field the
// signature covers is validated here first - in particular the score the
// client claims must equal the score this service recorded itself.

use candid::CandidType;
use ed25519_dalek::{Signer, SigningKey};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

use crate::player_records;
use crate::proof_keys::{self, KeyScope, ProofKeyError};

/// Server-held signing material. Empty until a controller configures it;
/// nothing is ever signed while unconfigured.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default)]
pub struct SignerConfig {
    #[serde(with = "serde_bytes")]
    pub signing_key: Vec<u8>,
    pub shared_secret: String,
}

impl SignerConfig {
    pub fn is_configured(&self) -> bool {
        self.signing_key.len() == 32 && !self.shared_secret.is_empty()
    }
}

impl Storable for SignerConfig {
    fn to_bytes(&self) -> Cow<[u8]> {
        let bytes = bincode::serialize(self).expect("Failed to serialize SignerConfig");
        Cow::Owned(bytes)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        bincode::deserialize(&bytes).expect("Failed to deserialize SignerConfig")
    }

    const BOUND: Bound = Bound::Unbounded;
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct SignatureRequest {
    pub recipient_address: String,
    pub token_address: String,
    pub amount: u64,
    pub token_name: String,
    pub client_nonce: String,
    pub fused_key: String,
    pub score: u64,
    pub player_id: u64,
    pub game: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct SignatureResponse {
    /// Hex-encoded 64-byte ed25519 signature.
    pub signature: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub enum SignatureError {
    MissingParams { message: String },
    ServerMisconfigured,
    InvalidKey,
    NoScoreOnRecord,
    ScoreMismatch,
    KeyAlreadyUsed,
}

impl SignatureError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingParams { .. } => 400,
            Self::InvalidKey => 401,
            Self::NoScoreOnRecord | Self::ScoreMismatch | Self::KeyAlreadyUsed => 403,
            Self::ServerMisconfigured => 500,
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParams { message } => {
                write!(f, "missing or malformed parameter: {}", message)
            }
            Self::ServerMisconfigured => write!(f, "signer is not configured"),
            Self::InvalidKey => write!(f, "verification key does not match"),
            Self::NoScoreOnRecord => write!(f, "no score on record for this game"),
            Self::ScoreMismatch => write!(f, "submitted score does not match the recorded score"),
            Self::KeyAlreadyUsed => write!(f, "verification key already used"),
        }
    }
}

/// Wire shape of a rejected issuance.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct SignatureFailure {
    pub error: String,
    pub code: u16,
}

impl From<SignatureError> for SignatureFailure {
    fn from(err: SignatureError) -> Self {
        SignatureFailure {
            error: err.to_string(),
            code: err.status_code(),
        }
    }
}

/// Decode a base58 address and require exactly 32 bytes.
pub fn decode_address(address: &str) -> Result<[u8; 32], String> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| format!("Invalid base58: {}", e))?;

    if decoded.len() != 32 {
        return Err(format!(
            "Invalid address length: expected 32 bytes, got {}",
            decoded.len()
        ));
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

/// Fixed-width claim payload: recipient || mint || amount, little-endian
/// amount. 72 bytes, layout owned by the claim contract.
pub fn pack_claim_payload(recipient: &[u8; 32], mint: &[u8; 32], amount: u64) -> [u8; 72] {
    let mut payload = [0u8; 72];
    payload[..32].copy_from_slice(recipient);
    payload[32..64].copy_from_slice(mint);
    payload[64..].copy_from_slice(&amount.to_le_bytes());
    payload
}

fn require_present(value: &str, name: &str) -> Result<(), SignatureError> {
    if value.is_empty() {
        return Err(SignatureError::MissingParams {
            message: name.to_string(),
        });
    }
    Ok(())
}

/// Run the issuance state machine for one request. Terminal outcomes only:
/// a signature, or a rejection that mutated nothing - except that the
/// replay-key insert is itself the final validation step, so a request that
/// fails *after* it cannot exist (signing is infallible once inputs are
/// validated).
pub fn issue_signature(
    request: &SignatureRequest,
    signer: &SignerConfig,
    now: u64,
) -> Result<SignatureResponse, SignatureError> {
    // 1. Parameter validation. Typed candid makes structural absence
    // impossible, so empty/zero/malformed stands in for missing.
    require_present(&request.recipient_address, "recipient_address")?;
    require_present(&request.token_address, "token_address")?;
    require_present(&request.token_name, "token_name")?;
    require_present(&request.client_nonce, "client_nonce")?;
    require_present(&request.fused_key, "fused_key")?;
    require_present(&request.game, "game")?;
    if request.amount == 0 {
        return Err(SignatureError::MissingParams {
            message: "amount".to_string(),
        });
    }
    let recipient = decode_address(&request.recipient_address).map_err(|e| {
        SignatureError::MissingParams {
            message: format!("recipient_address: {}", e),
        }
    })?;
    let mint =
        decode_address(&request.token_address).map_err(|e| SignatureError::MissingParams {
            message: format!("token_address: {}", e),
        })?;

    // 2. Never sign with an absent key.
    if !signer.is_configured() {
        return Err(SignatureError::ServerMisconfigured);
    }

    // 3. The supplied fused key must match the derivation.
    let expected = proof_keys::derive_fused_key(
        &request.client_nonce,
        &signer.shared_secret,
        request.score,
        request.player_id,
    );
    if request.fused_key != expected {
        return Err(SignatureError::InvalidKey);
    }

    // 4. The signature binds to the score this service recorded, not the
    // client's claim.
    let record =
        player_records::get_player(request.player_id).ok_or(SignatureError::NoScoreOnRecord)?;
    let progress = record
        .games
        .get(&request.game)
        .ok_or(SignatureError::NoScoreOnRecord)?;
    if progress.score != request.score {
        return Err(SignatureError::ScoreMismatch);
    }

    // 5. Burn the key. Last step before signing, after all validation.
    proof_keys::consume_key(
        KeyScope::RewardClaim,
        &request.fused_key,
        &request.recipient_address,
        request.player_id,
        now,
    )
    .map_err(|e| match e {
        ProofKeyError::AlreadyUsed => SignatureError::KeyAlreadyUsed,
        ProofKeyError::InvalidKey => SignatureError::InvalidKey,
    })?;

    // 6. Sign the packed payload.
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&signer.signing_key);
    let signing_key = SigningKey::from_bytes(&key_bytes);

    let payload = pack_claim_payload(&recipient, &mint, request.amount);
    let digest: [u8; 32] = Sha256::digest(payload).into();
    let signature = signing_key.sign(&digest);

    // Profile freshness rides along on successful issuance.
    let mut record = record;
    record.apply_profile(
        request.display_name.as_deref().unwrap_or(""),
        request.avatar_url.as_deref().unwrap_or(""),
    );
    record.updated_at = now;
    player_records::put_player(record);

    Ok(SignatureResponse {
        signature: hex::encode(signature.to_bytes()),
    })
}
