// Score Submission - fused-key-guarded leaderboard writes.
//
// A submission only ever raises the recorded bests: `score` (all-time) and
// `season_score` move independently and only upward. The run metadata and
// the opaque `game_data` blob travel with the all-time best.

use candid::CandidType;
use serde::Deserialize;
use std::fmt;

use crate::gift_claims::GiftConfig;
use crate::player_records::{self, GameProgress};
use crate::proof_keys::{self, KeyScope, ProofKeyError};
use crate::stable_mem_storage::PLAYERS;

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ScoreSubmission {
    pub player_id: u64,
    pub display_name: String,
    pub avatar_url: String,
    pub score: u64,
    pub game: String,
    /// JSON blob of per-run stats; validated to parse, stored verbatim.
    pub game_data: Option<String>,
    pub client_nonce: String,
    pub fused_key: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct ScoreAccepted {
    pub best_score: u64,
    pub season_score: u64,
    pub rank: u64,
    /// Whether this submission set a new all-time best.
    pub updated: bool,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub enum ScoreError {
    InvalidGame { game: String },
    MissingParams { message: String },
    InvalidGameData { message: String },
    InvalidKey,
    KeyAlreadyUsed,
    ServerMisconfigured,
}

impl ScoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidGame { .. }
            | Self::MissingParams { .. }
            | Self::InvalidGameData { .. } => 400,
            Self::InvalidKey => 401,
            Self::KeyAlreadyUsed => 409,
            Self::ServerMisconfigured => 500,
        }
    }
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGame { game } => write!(f, "unknown game: {}", game),
            Self::MissingParams { message } => {
                write!(f, "missing or malformed parameter: {}", message)
            }
            Self::InvalidGameData { message } => {
                write!(f, "game_data is not valid JSON: {}", message)
            }
            Self::InvalidKey => write!(f, "verification key does not match"),
            Self::KeyAlreadyUsed => write!(f, "verification key already used"),
            Self::ServerMisconfigured => write!(f, "shared secret is not configured"),
        }
    }
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ScoreFailure {
    pub error: String,
    pub code: u16,
}

impl From<ScoreError> for ScoreFailure {
    fn from(err: ScoreError) -> Self {
        ScoreFailure {
            error: err.to_string(),
            code: err.status_code(),
        }
    }
}

/// Lift the well-known numeric run stats out of the blob. Unknown keys are
/// carried in the stored blob untouched.
fn lift_run_stats(progress: &mut GameProgress, game_data: &serde_json::Value) {
    let field = |key: &str| game_data.get(key).and_then(|v| v.as_u64());
    if let Some(level) = field("level") {
        progress.level = level;
    }
    if let Some(time_secs) = field("time") {
        progress.time_secs = time_secs;
    }
    if let Some(stones) = field("stonesDestroyed") {
        progress.stones_destroyed = stones;
    }
    if let Some(hits) = field("playerHits") {
        progress.player_hits = hits;
    }
}

pub fn submit_score(
    submission: &ScoreSubmission,
    now: u64,
    config: &GiftConfig,
    shared_secret: &str,
) -> Result<ScoreAccepted, ScoreError> {
    if !config.is_catalog_game(&submission.game) {
        return Err(ScoreError::InvalidGame {
            game: submission.game.clone(),
        });
    }
    for (value, name) in [
        (&submission.display_name, "display_name"),
        (&submission.client_nonce, "client_nonce"),
        (&submission.fused_key, "fused_key"),
    ] {
        if value.is_empty() {
            return Err(ScoreError::MissingParams {
                message: name.to_string(),
            });
        }
    }
    let game_data = submission
        .game_data
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| ScoreError::InvalidGameData {
            message: e.to_string(),
        })?;
    if shared_secret.is_empty() {
        return Err(ScoreError::ServerMisconfigured);
    }

    proof_keys::verify_and_consume(
        KeyScope::ScoreSubmit,
        &submission.fused_key,
        &submission.client_nonce,
        submission.score,
        submission.player_id,
        shared_secret,
        &submission.display_name,
        now,
    )
    .map_err(|e| match e {
        ProofKeyError::InvalidKey => ScoreError::InvalidKey,
        ProofKeyError::AlreadyUsed => ScoreError::KeyAlreadyUsed,
    })?;

    let mut record = player_records::get_or_create_player(submission.player_id, now);
    record.apply_profile(&submission.display_name, &submission.avatar_url);

    let progress = record.games.entry(submission.game.clone()).or_default();
    let updated = submission.score > progress.score;
    if updated {
        progress.score = submission.score;
        progress.last_played = now;
        progress.game_data = submission.game_data.clone();
        if let Some(data) = &game_data {
            lift_run_stats(progress, data);
        }
    }
    if submission.score > progress.season_score {
        progress.season_score = submission.score;
    }
    let best_score = progress.score;
    let season_score = progress.season_score;
    record.updated_at = now;
    player_records::put_player(record);

    let rank = rank_for(&submission.game, best_score);

    Ok(ScoreAccepted {
        best_score,
        season_score,
        rank,
        updated,
    })
}

/// 1 + number of players strictly above `score` for `game`. Full scan of
/// the player store; the store is the aggregator here.
fn rank_for(game: &str, score: u64) -> u64 {
    PLAYERS.with(|store| {
        let map = store.borrow();
        let mut above = 0u64;
        for (_, record) in map.iter() {
            if let Some(progress) = record.games.get(game) {
                if progress.score > score {
                    above += 1;
                }
            }
        }
        above + 1
    })
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct LeaderboardEntry {
    pub player_id: u64,
    pub display_name: String,
    pub avatar_url: String,
    pub score: u64,
}

/// Top `limit` players for `game`, score descending, ties by ascending
/// player id.
pub fn top_players(game: &str, limit: u32) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = PLAYERS.with(|store| {
        store
            .borrow()
            .iter()
            .filter_map(|(player_id, record)| {
                record.games.get(game).map(|progress| LeaderboardEntry {
                    player_id,
                    display_name: record.display_name.clone(),
                    avatar_url: record.avatar_url.clone(),
                    score: progress.score,
                })
            })
            .collect()
    });
    entries.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    entries.truncate(limit as usize);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player_records::get_player;
    use crate::proof_keys::derive_fused_key;

    const SECRET: &str = "test-shared-secret";
    const NOW: u64 = 1_700_000_000_000;

    fn submission(player_id: u64, score: u64, nonce: &str) -> ScoreSubmission {
        ScoreSubmission {
            player_id,
            display_name: format!("player-{}", player_id),
            avatar_url: String::new(),
            score,
            game: "gem_rush".to_string(),
            game_data: None,
            client_nonce: nonce.to_string(),
            fused_key: derive_fused_key(nonce, SECRET, score, player_id),
        }
    }

    fn submit(sub: &ScoreSubmission) -> Result<ScoreAccepted, ScoreError> {
        submit_score(sub, NOW, &GiftConfig::default_config(), SECRET)
    }

    #[test]
    fn first_submission_creates_the_record_and_ranks_first() {
        let accepted = submit(&submission(1, 500, "n-1")).unwrap();
        assert_eq!(accepted.best_score, 500);
        assert_eq!(accepted.season_score, 500);
        assert_eq!(accepted.rank, 1);
        assert!(accepted.updated);

        let record = get_player(1).unwrap();
        assert_eq!(record.display_name, "player-1");
        assert_eq!(record.games["gem_rush"].score, 500);
        assert_eq!(record.games["gem_rush"].last_played, NOW);
    }

    #[test]
    fn lower_scores_never_overwrite_the_best() {
        submit(&submission(2, 500, "n-2a")).unwrap();
        let accepted = submit(&submission(2, 300, "n-2b")).unwrap();
        assert_eq!(accepted.best_score, 500);
        assert!(!accepted.updated);

        // Equal is not strictly greater either.
        let accepted = submit(&submission(2, 500, "n-2c")).unwrap();
        assert!(!accepted.updated);
    }

    #[test]
    fn replayed_fused_key_is_rejected_with_409() {
        let sub = submission(3, 500, "n-3");
        submit(&sub).unwrap();
        let err = submit(&sub).unwrap_err();
        assert_eq!(err, ScoreError::KeyAlreadyUsed);
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn key_derived_for_another_score_is_invalid() {
        let mut sub = submission(4, 500, "n-4");
        sub.score = 600; // key still derived for 500
        let err = submit(&sub).unwrap_err();
        assert_eq!(err, ScoreError::InvalidKey);
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn game_data_must_parse_and_lifts_known_stats() {
        let mut sub = submission(5, 500, "n-5");
        sub.game_data =
            Some(r#"{"level":9,"time":181,"stonesDestroyed":42,"playerHits":3,"combo":17}"#.into());
        submit(&sub).unwrap();

        let progress = get_player(5).unwrap().games["gem_rush"].clone();
        assert_eq!(progress.level, 9);
        assert_eq!(progress.time_secs, 181);
        assert_eq!(progress.stones_destroyed, 42);
        assert_eq!(progress.player_hits, 3);
        // Unknown keys survive in the stored blob.
        assert!(progress.game_data.unwrap().contains("combo"));

        let mut bad = submission(5, 600, "n-5b");
        bad.game_data = Some("{not json".into());
        let err = submit(&bad).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidGameData { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn unknown_game_is_bad_input() {
        let mut sub = submission(6, 500, "n-6");
        sub.game = "chess".to_string();
        let err = submit(&sub).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rank_counts_strictly_higher_players() {
        submit(&submission(10, 900, "n-10")).unwrap();
        submit(&submission(11, 700, "n-11")).unwrap();
        let accepted = submit(&submission(12, 800, "n-12")).unwrap();
        assert_eq!(accepted.rank, 2); // only 900 is above

        let accepted = submit(&submission(13, 900, "n-13")).unwrap();
        assert_eq!(accepted.rank, 1); // ties don't count as above
    }

    #[test]
    fn leaderboard_sorts_by_score_then_player_id() {
        submit(&submission(20, 500, "n-20")).unwrap();
        submit(&submission(21, 900, "n-21")).unwrap();
        submit(&submission(22, 500, "n-22")).unwrap();

        let top = top_players("gem_rush", 10);
        let ids: Vec<u64> = top.iter().map(|e| e.player_id).collect();
        assert_eq!(ids, vec![21, 20, 22]);

        let top = top_players("gem_rush", 2);
        assert_eq!(top.len(), 2);

        // Other games have their own boards.
        assert!(top_players("sky_hopper", 10).is_empty());
    }

    #[test]
    fn season_score_moves_independently_of_the_all_time_best() {
        // Seed an all-time best with a zeroed season (as a season reset
        // would leave it).
        submit(&submission(30, 1_000, "n-30")).unwrap();
        let mut record = get_player(30).unwrap();
        record.games.get_mut("gem_rush").unwrap().season_score = 0;
        crate::player_records::put_player(record);

        let accepted = submit(&submission(30, 400, "n-30b")).unwrap();
        assert_eq!(accepted.best_score, 1_000);
        assert_eq!(accepted.season_score, 400);
        assert!(!accepted.updated);
    }
}
