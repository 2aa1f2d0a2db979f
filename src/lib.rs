// arcade-rewards-backend - canister surface for the arcade mini-games.
//
// Game clients submit scores and claim daily gifts here; successful claims
// are later redeemed on-chain with a signature from this canister. Core
// logic lives in the modules; the functions below only convert the clock,
// gather entropy, read configuration, and log outcomes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ic_cdk::{query, update};

mod gift_claims;
mod player_records;
mod proof_keys;
mod rewards;
mod scores;
mod signature_issuance;
mod stable_mem_storage;

use gift_claims::{ClaimError, ClaimFailure, ClaimSuccess, GiftConfig, GiftStatusResponse};
use player_records::PlayerRecord;
use rewards::RewardCatalog;
use scores::{LeaderboardEntry, ScoreAccepted, ScoreFailure, ScoreSubmission};
use signature_issuance::{SignatureFailure, SignatureRequest, SignatureResponse, SignerConfig};
use stable_mem_storage::SIGNER_CONFIG;

/// The IC clock is nanoseconds; everything downstream works in unix ms.
fn now_ms() -> u64 {
    ic_cdk::api::time() / 1_000_000
}

/// Platform entropy for reward selection. Gathered up front so the claim
/// transaction itself runs without a suspension point.
async fn gather_entropy() -> Result<[u8; 32], String> {
    let (bytes,) = ic_cdk::api::management_canister::main::raw_rand()
        .await
        .map_err(|(code, message)| format!("raw_rand failed: {:?} {}", code, message))?;
    bytes
        .try_into()
        .map_err(|_| "raw_rand returned an unexpected length".to_string())
}

#[update]
async fn claim_daily_gift(player_id: u64, game: String) -> Result<ClaimSuccess, ClaimFailure> {
    let entropy = match gather_entropy().await {
        Ok(entropy) => entropy,
        Err(message) => {
            ic_cdk::println!("Gift claim failed to gather entropy: {}", message);
            return Err(ClaimError::Internal { message }.into());
        }
    };

    let config = GiftConfig::default_config();
    let catalog = RewardCatalog::default_catalog();
    match gift_claims::try_claim(player_id, &game, now_ms(), &entropy, &config, &catalog) {
        Ok(success) => {
            ic_cdk::println!(
                "Gift claimed: player {} game {} reward {} x{} ({}/{} this window)",
                player_id,
                game,
                success.reward.token,
                success.reward.amount,
                success.window.claimed,
                success.window.limit
            );
            Ok(success)
        }
        Err(err) => {
            ic_cdk::println!("Gift claim rejected: player {} game {}: {}", player_id, game, err);
            Err(err.into())
        }
    }
}

// An update, not a query: the status check persists lazy window
// initialization and any rollovers it finds.
#[update]
fn get_gift_status(player_id: u64) -> GiftStatusResponse {
    gift_claims::get_status(player_id, now_ms(), &GiftConfig::default_config())
}

#[update]
fn issue_reward_signature(
    request: SignatureRequest,
) -> Result<SignatureResponse, SignatureFailure> {
    let signer = SIGNER_CONFIG.with(|cell| cell.borrow().get().clone());
    match signature_issuance::issue_signature(&request, &signer, now_ms()) {
        Ok(response) => {
            ic_cdk::println!(
                "Signature issued: player {} game {} token {} amount {} -> {}",
                request.player_id,
                request.game,
                request.token_name,
                request.amount,
                request.recipient_address
            );
            Ok(response)
        }
        Err(err) => {
            ic_cdk::println!(
                "Signature refused: player {} game {}: {}",
                request.player_id,
                request.game,
                err
            );
            Err(err.into())
        }
    }
}

#[update]
fn submit_score(submission: ScoreSubmission) -> Result<ScoreAccepted, ScoreFailure> {
    let shared_secret = SIGNER_CONFIG.with(|cell| cell.borrow().get().shared_secret.clone());
    let result = scores::submit_score(
        &submission,
        now_ms(),
        &GiftConfig::default_config(),
        &shared_secret,
    );
    match result {
        Ok(accepted) => {
            ic_cdk::println!(
                "Score accepted: player {} game {} score {} (best {}, rank {})",
                submission.player_id,
                submission.game,
                submission.score,
                accepted.best_score,
                accepted.rank
            );
            Ok(accepted)
        }
        Err(err) => {
            ic_cdk::println!(
                "Score rejected: player {} game {}: {}",
                submission.player_id,
                submission.game,
                err
            );
            Err(err.into())
        }
    }
}

#[query]
fn get_leaderboard(game: String, limit: u32) -> Vec<LeaderboardEntry> {
    scores::top_players(&game, limit)
}

#[query]
fn get_player(player_id: u64) -> Option<PlayerRecord> {
    player_records::get_player(player_id)
}

/// Install the signing material. The ed25519 secret arrives base64-encoded;
/// the shared secret is the plain string the game clients embed.
#[update]
fn set_signer_config(signing_key_b64: String, shared_secret: String) -> Result<(), String> {
    let caller = ic_cdk::caller();
    if !ic_cdk::api::is_controller(&caller) {
        return Err("Only controller can configure the signer".to_string());
    }
    let signing_key = BASE64
        .decode(signing_key_b64.as_bytes())
        .map_err(|e| format!("Invalid base64 signing key: {}", e))?;
    if signing_key.len() != 32 {
        return Err(format!(
            "Invalid signing key length: expected 32 bytes, got {}",
            signing_key.len()
        ));
    }
    if shared_secret.is_empty() {
        return Err("Shared secret must not be empty".to_string());
    }

    SIGNER_CONFIG.with(|cell| {
        cell.borrow_mut()
            .set(SignerConfig {
                signing_key,
                shared_secret,
            })
            .map(|_| ())
            .map_err(|e| format!("Failed to persist signer config: {:?}", e))
    })?;

    ic_cdk::println!("Signer configured by {}", caller);
    Ok(())
}

/// The public key the claim contract is provisioned with. Empty until the
/// signer is configured.
#[query]
fn signer_public_key() -> String {
    SIGNER_CONFIG.with(|cell| {
        let cell = cell.borrow();
        let config = cell.get();
        if !config.is_configured() {
            return String::new();
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&config.signing_key);
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&key);
        hex::encode(signing_key.verifying_key().to_bytes())
    })
}

ic_cdk::export_candid!();
