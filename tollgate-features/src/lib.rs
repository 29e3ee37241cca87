//! Feature Flags for Tollgate
//!
//! Flags live in a remote store; callers query it through [`FlagStore`].
//! Stores report failures as errors; the caller picks the fallback answer.
//!
//! # Quick Start
//!
//! ```
//! use tollgate_features::*;
//!
//! # async fn demo() {
//! let store = InMemoryFlagStore::new();
//! store.set("gateway.azul.new-payers", true).await;
//!
//! let enabled = store.is_enabled("gateway.azul.new-payers").await.unwrap();
//! assert_eq!(enabled, Some(true));
//! # }
//! ```

pub mod error;
pub mod flag;
pub mod store;

pub use error::{FlagError, FlagResult};
pub use flag::FeatureFlag;
pub use store::{FlagStore, HttpFlagStore, InMemoryFlagStore};
