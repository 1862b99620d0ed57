//! Chrome automation over the DevTools protocol.
//!
//! One browser-level WebSocket carries every page session (flattened
//! `Target.attachToTarget`). Chrome runs in its own process tree and survives
//! the invocations that drive it.

pub mod cdp;
pub mod launcher;
pub mod page;
pub mod recorder;
pub mod session;
pub mod snapshot;

pub use page::Page;
pub use session::BrowsingSession;
