pub mod indexer;
pub mod liquidity;
pub mod onramp;
pub mod oracle;
pub mod settlement;
pub mod watcher;
