pub mod scheduler;
pub mod store;

pub use scheduler::{PersistOutcome, PersistenceScheduler, SkipReason, Trigger};
pub use store::{FlagStore, RemoteStore};
