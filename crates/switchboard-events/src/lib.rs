//! # switchboard-events
//!
//! Named-event publish/subscribe used to decouple plugins from the dispatch
//! path. Listeners run synchronously, in registration order, against a
//! snapshot of the listener list taken when [`EventBus::dispatch`] starts.
//!
//! A listener error aborts the remaining listeners for that dispatch and is
//! returned to the caller. Callers that need isolation wrap their listeners.

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod types;

pub use bus::{EventBus, Listener, listener};
pub use errors::{EventError, ListenerError};
pub use types::{EventPayload, names};
