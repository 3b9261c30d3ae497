//! The TCP request/response protocol (spec.md sections 4.7, 4.8, 6):
//! canonical request/response framing, the listener that serves it, and
//! the requester that drives it against a candidate peer list.

pub mod listener;
pub mod requester;
pub mod wire;

pub use listener::{Listener, RequestHandler};
pub use requester::Requester;
pub use wire::{Request, Response, ResponseShape};
