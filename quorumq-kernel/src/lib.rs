//! `quorumq-kernel` - pure functional core of a replicated FIFO message
//! queue.
//!
//! The kernel applies committed commands to produce new state, a direct
//! reply, and a list of effects for the substrate to execute. It is
//! completely pure: no IO, no clocks, no randomness, no threads. This makes
//! it deterministic and easy to test — the same command log replayed twice
//! produces bit-identical state (see `state_hash`).
//!
//! # Example
//!
//! ```ignore
//! let state = State::new(QueueConfig::new("orders", "orders-rid"));
//! let meta = Meta::new(LogIndex::new(1), Timestamp::from_millis(1));
//! let (state, reply, effects) = apply(state, meta, Command::RegisterEnqueuer { pid });
//! // Runtime executes effects...
//! ```

pub mod checkout;
pub mod command;
pub mod config;
pub mod credit;
pub mod dlx;
pub mod effects;
pub mod enqueue;
pub mod errors;
pub mod header;
pub mod index;
pub mod kernel;
pub mod lifecycle;
pub mod limits;
pub mod liveness;
pub mod purge;
pub mod queries;
pub mod registry;
pub mod release_cursor;
pub mod reply;
pub mod runtime;
pub mod settlement;
pub mod single_active;
pub mod state;
pub mod state_hash;
pub mod version;

#[cfg(test)]
mod tests_assertions;

pub use command::{Command, Meta};
pub use effects::Effect;
pub use errors::DispatchError;
pub use kernel::apply;
pub use reply::Reply;
pub use runtime::{Clock, Log, LogError, Network, NetworkError, Runtime};
pub use state::State;
