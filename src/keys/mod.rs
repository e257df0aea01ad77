//! # Data Owner Keys
//!
//! Which private keys the current data owner can use, how missing ones come
//! back, and how a new key is announced to the data owners it shares with.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  KeyHierarchyManager                                                    │
//! │     ├── KeyStore            keys on this device                        │
//! │     ├── KeyPairRecoverer    Shamir notaries, recovery keys             │
//! │     └── CryptoStrategies    caller policy: trust, recovery, generation │
//! │                                                                         │
//! │  KeyPairUpdateManager       KEY_PAIR_UPDATE maintenance tasks          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod hierarchy;
mod recoverer;
mod strategies;
mod update;

pub use hierarchy::{HierarchyKeyPair, KeyHierarchy, KeyHierarchyLevel, KeyHierarchyManager};
pub use recoverer::KeyPairRecoverer;
pub use strategies::{
    CryptoStrategies, KeyGenerationDecision, KeyHierarchyLevelInfo, RecoveredKeyData,
    SimpleCryptoStrategies,
};
pub use update::{
    KeyPairUpdateManager, KeyPairUpdateOutcome, DATA_OWNER_CONCERNED_ID,
    DATA_OWNER_CONCERNED_PUB_KEY, KEY_PAIR_UPDATE,
};
