// Player Record Store - one durable record per player.
//
// A record aggregates profile fields, per-game progress, and per-game gift
// windows. Records are created lazily on first score submission or first
// gift-status check and never deleted.

use candid::CandidType;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::stable_mem_storage::PLAYERS;

/// Per-game progress embedded in a player record.
///
/// `score` is the all-time best and only ever increases: a submission
/// overwrites it (and the run metadata below) only when strictly greater.
/// `season_score` follows the same rule within the active season.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GameProgress {
    pub score: u64,
    pub season_score: u64,
    // Run metadata reported by the client alongside the best score. Stored
    // and echoed back, never interpreted.
    pub level: u64,
    pub time_secs: u64,
    pub stones_destroyed: u64,
    pub player_hits: u64,
    /// Raw JSON blob from the client, validated to parse, stored verbatim.
    pub game_data: Option<String>,
    /// Timestamp of the submission that set `score`.
    pub last_played: u64,
}

/// Per-game daily-gift window embedded in a player record.
///
/// `claimed` counts gifts taken in the current window and never exceeds
/// `limit` as observed by the guarded increment in `gift_claims`. A window
/// with `now >= resets_at` is expired and must be rolled over before any
/// read or write.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct GiftWindow {
    pub claimed: u32,
    pub limit: u32,
    pub window_hours: u32,
    pub resets_at: u64,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct PlayerRecord {
    pub player_id: u64,
    pub display_name: String,
    pub avatar_url: String,
    /// Keyed only by names from the game catalog.
    pub games: BTreeMap<String, GameProgress>,
    /// Keyed only by names from the game catalog.
    pub daily_gifts: BTreeMap<String, GiftWindow>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PlayerRecord {
    pub fn new(player_id: u64, now: u64) -> Self {
        PlayerRecord {
            player_id,
            display_name: String::new(),
            avatar_url: String::new(),
            games: BTreeMap::new(),
            daily_gifts: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Last-write-wins profile fields. Empty strings are skipped so a
    /// request without profile data never erases an existing one.
    pub fn apply_profile(&mut self, display_name: &str, avatar_url: &str) {
        if !display_name.is_empty() {
            self.display_name = display_name.to_string();
        }
        if !avatar_url.is_empty() {
            self.avatar_url = avatar_url.to_string();
        }
    }
}

impl Storable for PlayerRecord {
    fn to_bytes(&self) -> Cow<[u8]> {
        let bytes = bincode::serialize(self).expect("Failed to serialize PlayerRecord");
        Cow::Owned(bytes)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        bincode::deserialize(&bytes).expect("Failed to deserialize PlayerRecord")
    }

    const BOUND: Bound = Bound::Unbounded;
}

// ===== Store access =====

pub fn get_player(player_id: u64) -> Option<PlayerRecord> {
    PLAYERS.with(|store| store.borrow().get(&player_id))
}

/// Load the player's record, creating and persisting an empty one if this
/// is the first time the player is seen.
pub fn get_or_create_player(player_id: u64, now: u64) -> PlayerRecord {
    PLAYERS.with(|store| {
        let mut map = store.borrow_mut();
        if let Some(record) = map.get(&player_id) {
            return record;
        }
        let record = PlayerRecord::new(player_id, now);
        map.insert(player_id, record.clone());
        record
    })
}

pub fn put_player(record: PlayerRecord) {
    PLAYERS.with(|store| {
        store.borrow_mut().insert(record.player_id, record);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_create_persists_record() {
        assert!(get_player(7).is_none());
        let record = get_or_create_player(7, 1_000);
        assert_eq!(record.player_id, 7);
        assert_eq!(record.created_at, 1_000);
        assert!(record.games.is_empty());
        assert!(record.daily_gifts.is_empty());

        let reloaded = get_player(7).expect("record was persisted");
        assert_eq!(reloaded.created_at, 1_000);
    }

    #[test]
    fn get_or_create_returns_existing_record() {
        let mut record = get_or_create_player(9, 500);
        record.display_name = "alice".to_string();
        put_player(record);

        let again = get_or_create_player(9, 9_999);
        assert_eq!(again.display_name, "alice");
        assert_eq!(again.created_at, 500);
    }

    #[test]
    fn profile_update_skips_empty_fields() {
        let mut record = PlayerRecord::new(1, 0);
        record.apply_profile("bob", "https://example.com/bob.png");
        record.apply_profile("", "");
        assert_eq!(record.display_name, "bob");
        assert_eq!(record.avatar_url, "https://example.com/bob.png");
    }

    #[test]
    fn record_roundtrips_through_storable() {
        let mut record = PlayerRecord::new(42, 123);
        record.games.insert(
            "gem_rush".to_string(),
            GameProgress {
                score: 900,
                season_score: 400,
                level: 12,
                ..GameProgress::default()
            },
        );
        let bytes = record.to_bytes().into_owned();
        let decoded = PlayerRecord::from_bytes(Cow::Owned(bytes));
        assert_eq!(decoded.player_id, 42);
        assert_eq!(decoded.games.get("gem_rush").unwrap().score, 900);
    }
}
