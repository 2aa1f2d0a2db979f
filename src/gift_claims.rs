// Gift Claim State Machine - per (player, game) windowed claim quotas.
//
// Each window is Open (claimed < limit, now < resets_at) or Exhausted
// (claimed >= limit, now < resets_at). The only way out of Exhausted is
// Rollover: any evaluation at now >= resets_at resets the window to
// claimed = 0 with a fresh boundary, and Rollover also re-anchors a window
// that was still Open.

use candid::CandidType;
use serde::Deserialize;
use std::fmt;

use crate::player_records::{self, GiftWindow, PlayerRecord};
use crate::rewards::{self, RewardCatalog, SelectedReward};
use crate::stable_mem_storage::PLAYERS;

/// Game catalog plus the shared window parameters. Injected into every
/// operation so tests can run alternate catalogs.
#[derive(Clone, Debug)]
pub struct GiftConfig {
    pub games: Vec<&'static str>,
    pub limit: u32,
    pub window_hours: u32,
}

impl GiftConfig {
    /// The deployment catalog: the five titles the game clients ship.
    pub fn default_config() -> Self {
        GiftConfig {
            games: vec![
                "gem_rush",
                "astro_blaster",
                "sky_hopper",
                "stone_smash",
                "neon_run",
            ],
            limit: 5,
            window_hours: 12,
        }
    }

    pub fn is_catalog_game(&self, game: &str) -> bool {
        self.games.iter().any(|g| *g == game)
    }
}

/// Exclusive end of a claim window anchored at `reference_ms`.
pub fn window_end(reference_ms: u64, window_hours: u32) -> u64 {
    reference_ms + window_hours as u64 * 3_600_000
}

fn fresh_window(config: &GiftConfig, now: u64) -> GiftWindow {
    GiftWindow {
        claimed: 0,
        limit: config.limit,
        window_hours: config.window_hours,
        resets_at: window_end(now, config.window_hours),
    }
}

/// Ensure every catalog game has a window and roll over every expired one.
///
/// A full-record sweep, not scoped to the game being touched: checking any
/// one game also resets other games' expired windows as a side effect, and
/// the clients rely on that. Returns whether the record changed.
fn sweep_windows(record: &mut PlayerRecord, config: &GiftConfig, now: u64) -> bool {
    let mut changed = false;
    for game in &config.games {
        match record.daily_gifts.get_mut(*game) {
            None => {
                record
                    .daily_gifts
                    .insert(game.to_string(), fresh_window(config, now));
                changed = true;
            }
            Some(window) if now >= window.resets_at => {
                window.claimed = 0;
                window.resets_at = window_end(now, window.window_hours);
                changed = true;
            }
            Some(_) => {}
        }
    }
    changed
}

// ===== Claim =====

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct WindowView {
    pub resets_at: u64,
    pub claimed: u32,
    pub limit: u32,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct ClaimSuccess {
    pub reward: SelectedReward,
    pub window: WindowView,
    pub best_score: u64,
    pub game: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub enum ClaimError {
    InvalidGame { game: String },
    PlayerNotFound { player_id: u64 },
    QuotaExceeded { ms_left: u64 },
    RaceLost,
    Internal { message: String },
}

impl ClaimError {
    /// HTTP-style status the front-end maps each failure to. RaceLost (409)
    /// is distinct from QuotaExceeded (429) so clients retry immediately
    /// instead of backing off for the window.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidGame { .. } => 400,
            Self::PlayerNotFound { .. } => 404,
            Self::RaceLost => 409,
            Self::QuotaExceeded { .. } => 429,
            Self::Internal { .. } => 500,
        }
    }
}

impl fmt::Display for ClaimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGame { game } => write!(f, "unknown game: {}", game),
            Self::PlayerNotFound { player_id } => write!(f, "unknown player: {}", player_id),
            Self::QuotaExceeded { ms_left } => {
                write!(f, "gift limit reached, resets in {}ms", ms_left)
            }
            Self::RaceLost => write!(f, "claim lost a concurrent update, retry"),
            Self::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

/// Wire shape of a failed claim: an error string, the status code, and the
/// back-off hint when the quota is exhausted.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct ClaimFailure {
    pub error: String,
    pub code: u16,
    pub ms_left: Option<u64>,
}

impl From<ClaimError> for ClaimFailure {
    fn from(err: ClaimError) -> Self {
        let ms_left = match err {
            ClaimError::QuotaExceeded { ms_left } => Some(ms_left),
            _ => None,
        };
        ClaimFailure {
            error: err.to_string(),
            code: err.status_code(),
            ms_left,
        }
    }
}

/// Claim one gift for (player, game) at `now`.
///
/// The record is swept (lazy windows + rollovers) and persisted first; the
/// increment itself re-reads the stored window and only applies while
/// `claimed < limit` still holds at write time. A guard miss surfaces as
/// `RaceLost`. Entropy must be gathered by the caller before entering, so
/// the sweep-check-increment sequence runs without a suspension point.
pub fn try_claim(
    player_id: u64,
    game: &str,
    now: u64,
    entropy: &[u8; 32],
    config: &GiftConfig,
    catalog: &RewardCatalog,
) -> Result<ClaimSuccess, ClaimError> {
    if !config.is_catalog_game(game) {
        return Err(ClaimError::InvalidGame {
            game: game.to_string(),
        });
    }
    let mut record =
        player_records::get_player(player_id).ok_or(ClaimError::PlayerNotFound { player_id })?;

    if sweep_windows(&mut record, config, now) {
        record.updated_at = now;
        player_records::put_player(record.clone());
    }

    let window = record
        .daily_gifts
        .get(game)
        .ok_or_else(|| ClaimError::Internal {
            message: format!("gift window missing for {} after sweep", game),
        })?;
    if window.claimed >= window.limit {
        return Err(ClaimError::QuotaExceeded {
            ms_left: window.resets_at.saturating_sub(now),
        });
    }

    let (window, best_score) =
        guarded_increment(player_id, game, now).ok_or(ClaimError::RaceLost)?;

    let reward = rewards::select_reward(catalog, entropy).ok_or_else(|| ClaimError::Internal {
        message: "reward catalog is empty".to_string(),
    })?;

    Ok(ClaimSuccess {
        reward,
        window,
        best_score,
        game: game.to_string(),
    })
}

/// Conditional increment with match feedback: re-reads the stored record
/// and bumps `claimed` only while `claimed < limit` still holds at write
/// time. `None` means no row matched the guard: the caller lost the race.
fn guarded_increment(player_id: u64, game: &str, now: u64) -> Option<(WindowView, u64)> {
    PLAYERS.with(|store| {
        let mut map = store.borrow_mut();
        let mut current = map.get(&player_id)?;
        let best_score = current.games.get(game).map(|g| g.score).unwrap_or(0);
        let window = current.daily_gifts.get_mut(game)?;
        if window.claimed >= window.limit {
            return None;
        }
        window.claimed += 1;
        let view = WindowView {
            resets_at: window.resets_at,
            claimed: window.claimed,
            limit: window.limit,
        };
        current.updated_at = now;
        map.insert(player_id, current);
        Some((view, best_score))
    })
}

// ===== Status =====

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct GameGiftStatus {
    pub game: String,
    pub claimed: u32,
    pub limit: u32,
    pub remaining: u32,
    pub resets_at: u64,
    pub ms_left: u64,
    pub window_hours: u32,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq)]
pub struct GiftTotals {
    pub claimed: u32,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct GiftStatusResponse {
    pub per_game: Vec<GameGiftStatus>,
    pub totals: GiftTotals,
    pub now: u64,
}

/// Window state for every catalog game, creating the player record and an
/// all-Open gift map on first contact and rolling over anything expired.
/// Persists whatever it fixed up.
pub fn get_status(player_id: u64, now: u64, config: &GiftConfig) -> GiftStatusResponse {
    let mut record = player_records::get_or_create_player(player_id, now);
    if sweep_windows(&mut record, config, now) {
        record.updated_at = now;
        player_records::put_player(record.clone());
    }

    let mut per_game = Vec::with_capacity(config.games.len());
    let mut totals = GiftTotals {
        claimed: 0,
        limit: 0,
        remaining: 0,
    };
    for game in &config.games {
        // Present for every catalog game after the sweep.
        let Some(window) = record.daily_gifts.get(*game) else {
            continue;
        };
        let remaining = window.limit.saturating_sub(window.claimed);
        totals.claimed += window.claimed;
        totals.limit += window.limit;
        totals.remaining += remaining;
        per_game.push(GameGiftStatus {
            game: game.to_string(),
            claimed: window.claimed,
            limit: window.limit,
            remaining,
            resets_at: window.resets_at,
            ms_left: window.resets_at.saturating_sub(now),
            window_hours: window.window_hours,
        });
    }

    GiftStatusResponse {
        per_game,
        totals,
        now,
    }
}
