//! Crypto primitives, the canonical binary codec, and the shared error
//! type used by every crate in the drop sync workspace.
//!
//! ## Wire-stable types
//!
//! - Content hashes (`hash::Hash`)
//! - Node identity (`crypto::NodeId`, `crypto::PrivateKey`, `crypto::PublicKey`)
//! - The canonical dictionary codec (`codec::Value`)
//!
//! These are used directly in signed metadata and the network protocol;
//! changes to them are protocol changes.

pub mod codec;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod hash;

pub use codec::Value;
pub use crypto::{NodeId, PrivateKey, PublicKey};
pub use error::{SyncrError, SyncrResult};
pub use hash::Hash;
