//! Per-node configuration, identity loading, and the listener/announcer
//! lifecycle that turns a [`syncr_sync::SyncEngine`] into a running process
//! (spec.md section 6 "Configuration", section 5 "Concurrency & resource
//! model"). The command-line entry point that loads a config file and
//! calls [`node::run_until_shutdown`] is an external collaborator (spec.md
//! section 1) and lives outside this crate.

pub mod config;
pub mod context;
pub mod identity;
pub mod node;

pub use config::{LookupConfig, NodeConfig};
pub use context::NodeContext;
pub use node::{run_until_shutdown, shutdown_channel};
