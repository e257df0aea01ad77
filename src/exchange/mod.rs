//! # Exchange Data
//!
//! Sharing of symmetric keys between data owners.
//!
//! ## Sharing Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SHARING FLOW                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Delegator                                                              │
//! │  ─────────                                                              │
//! │  1. keys of the delegate, filtered by CryptoStrategies                 │
//! │  2. reuse or create exchange data delegator → delegate                 │
//! │  3. secure delegation under the security metadata key                  │
//! │  4. exchange data map entry for anonymous delegations                  │
//! │                                                                         │
//! │  Delegate                                                               │
//! │  ────────                                                               │
//! │  1. security metadata key ──► map id ──► encrypted exchange data id    │
//! │  2. exchange data ──► verify signatures ──► exchange key               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod access_control;
mod manager;
mod map;
mod protocol;

pub use access_control::{exchange_data_map_entry, secure_delegation, AccessLevel, SecureDelegation};
pub use manager::{ExchangeDataManager, SharedAccess};
pub use map::ExchangeDataDirectory;
pub use protocol::{
    create_exchange_data, decrypt, extend_access, verify, DecryptedExchangeData,
    VerifiedExchangeData,
};
