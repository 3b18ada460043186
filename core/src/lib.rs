pub mod backend;
pub mod catalog;
pub mod checkout;
pub mod chunker;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod history;
pub mod indexer;
pub mod progress;
pub mod purge;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod types;
mod walk;

pub use checkout::CheckoutOptions;
pub use chunker::ChunkerConfig;
pub use error::{Error, Result};
pub use filter::{IgnoreFilter, NoIgnore, PatternIgnore};
pub use indexer::IndexOptions;
pub use progress::{CancelFlag, NoProgress, Progress};
pub use purge::{PurgeOptions, PurgeStat};
pub use repository::{IndexDiff, Repo, RepoOptions};
pub use snapshot::{File, Index, SystemInfo};
pub use types::*;
