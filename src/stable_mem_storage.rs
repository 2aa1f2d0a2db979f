// Stable memory registry - one thread-local handle per durable collection.
//
// Memory IDs are append-only: never reuse or renumber an ID once a release
// has shipped with it, or upgrades will read another collection's bytes.

use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::{DefaultMemoryImpl, StableBTreeMap, StableCell};
use std::cell::RefCell;

use crate::player_records::PlayerRecord;
use crate::proof_keys::UsedKeyRecord;
use crate::signature_issuance::SignerConfig;

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));

    /// One record per player, keyed by the platform-issued numeric id (fid).
    pub static PLAYERS: RefCell<StableBTreeMap<u64, PlayerRecord, Memory>> = RefCell::new(
        StableBTreeMap::init(MEMORY_MANAGER.with(|mm| mm.borrow().get(MemoryId::new(0)))),
    );

    /// Fused keys consumed by reward-signature issuance. Append-only.
    pub static USED_REWARD_KEYS: RefCell<StableBTreeMap<String, UsedKeyRecord, Memory>> =
        RefCell::new(StableBTreeMap::init(
            MEMORY_MANAGER.with(|mm| mm.borrow().get(MemoryId::new(1))),
        ));

    /// Fused keys consumed by score submission. Append-only.
    pub static USED_SCORE_KEYS: RefCell<StableBTreeMap<String, UsedKeyRecord, Memory>> =
        RefCell::new(StableBTreeMap::init(
            MEMORY_MANAGER.with(|mm| mm.borrow().get(MemoryId::new(2))),
        ));

    /// Signer configuration (ed25519 secret + shared client secret).
    /// Defaults to unconfigured until a controller sets it.
    pub static SIGNER_CONFIG: RefCell<StableCell<SignerConfig, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|mm| mm.borrow().get(MemoryId::new(3))),
            SignerConfig::default(),
        )
        .expect("Failed to initialize signer config cell"),
    );
}
