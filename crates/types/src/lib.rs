pub mod ledger;
pub mod order;
pub mod tick;

pub use ledger::*;
pub use order::*;
pub use tick::*;

/// Coins are counted in the smallest payable unit.
pub type Coins = u64;
