pub mod catalog;
mod delivery;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod sqlite_store;
pub mod store;
pub mod validator;


// Re-export main types
pub use catalog::PriceCatalog;
pub use engine::{EngineConfig, OrderEngine, OrderEngineBuilder};
pub use error::{BuilderError, OrderError};
pub use recovery::{RecoveryAction, RecoveryReport, RecoveryResult};
pub use sqlite_store::SqliteOrderStore;
pub use store::{InMemoryOrderStore, OrderStore, StateTransition, StoreError};
pub use validator::{OrderValidator, ValidationError};

/// Wall-clock seconds since the Unix epoch
pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
