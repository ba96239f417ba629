//! Lantern Core Library
//!
//! This crate provides the core of the Lantern host, including:
//! - Event bus (typed topics, synchronous fan-out)
//! - Model session management (load/unload, streaming inference)
//! - Configuration
//! - The shared error taxonomy

pub mod bus;
pub mod config;
pub mod error;
pub mod session;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{Event, EventBus, EventPayload, Topic};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::session::{
        LoadParams, SamplingParams, SessionManager, SessionMetadata, SessionStatus, TokenEvent,
        TokenStream,
    };
}
