// Reward Selection - picks a token and amount from a fixed catalog.
//
// The catalog maps each token to a mint address and decimal precision; both
// are configuration, never computed. Selection is a deterministic function
// of the entropy bytes handed in by the caller, so the endpoint layer feeds
// it platform randomness and tests feed it fixed sequences.

use candid::CandidType;
use serde::{Deserialize, Serialize};

/// One entry in the reward-token catalog. Amounts are expressed in the
/// token's smallest unit; `min_units..=max_units` is the draw range.
#[derive(Clone, Debug)]
pub struct RewardToken {
    pub name: &'static str,
    pub mint: &'static str,
    pub decimals: u8,
    pub min_units: u64,
    pub max_units: u64,
}

#[derive(Clone, Debug)]
pub struct RewardCatalog {
    pub tokens: Vec<RewardToken>,
}

impl RewardCatalog {
    /// The deployment catalog. Mints are the production token mints of the
    /// external claim contract.
    pub fn default_catalog() -> Self {
        RewardCatalog {
            tokens: vec![
                RewardToken {
                    name: "SPARK",
                    mint: "67NJisbQvzcKUspjLkHNYUiviG2HymhSY6oeKQiJXbWR",
                    decimals: 9,
                    min_units: 1_000_000_000,
                    max_units: 5_000_000_000,
                },
                RewardToken {
                    name: "EMBER",
                    mint: "6zzzKBm5wG86E8s7Fz2VAQGnKkiEYKtqu5zRzU1omG12",
                    decimals: 6,
                    min_units: 10_000_000,
                    max_units: 50_000_000,
                },
                RewardToken {
                    name: "PRISM",
                    mint: "Csc4Njw8914zV8pF9FDuUd837fEw4X7SYBnroZPANfdr",
                    decimals: 9,
                    min_units: 100_000_000,
                    max_units: 1_000_000_000,
                },
            ],
        }
    }
}

/// The reward handed back to a successful gift claim. The client later
/// echoes `token_address` and `amount` in its signature request.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SelectedReward {
    pub token: String,
    pub amount: u64,
    pub token_address: String,
    pub decimals: u8,
}

/// Uniform token pick from the catalog, uniform amount within the token's
/// configured range. Returns `None` only for an empty catalog.
pub fn select_reward(catalog: &RewardCatalog, entropy: &[u8; 32]) -> Option<SelectedReward> {
    if catalog.tokens.is_empty() {
        return None;
    }
    let token_roll = u64::from_le_bytes(entropy[0..8].try_into().expect("8-byte slice"));
    let amount_roll = u64::from_le_bytes(entropy[8..16].try_into().expect("8-byte slice"));

    let token = &catalog.tokens[(token_roll % catalog.tokens.len() as u64) as usize];
    let span = token.max_units - token.min_units + 1;
    let amount = token.min_units + amount_roll % span;

    Some(SelectedReward {
        token: token.name.to_string(),
        amount,
        token_address: token.mint.to_string(),
        decimals: token.decimals,
    })
}
