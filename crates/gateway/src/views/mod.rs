//! Read models built from committed events

mod trader_directory;

pub use trader_directory::{TraderDirectory, TraderSummary};
