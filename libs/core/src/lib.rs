//! Unified communication gateway core.
//!
//! Canonical messages, conversation tracking, the message log, the adapter
//! contract and registry, per-platform ingest adapters, and the router that
//! delivers canonical messages to downstream endpoints or partner transforms.
pub mod adapter;
pub mod adapter_registry;
pub mod conversation;
pub mod credentials;
pub mod delivery;
pub mod http_client;
pub mod message;
pub mod message_log;
pub mod pipeline;
pub mod platforms;
pub mod router;
pub mod signature;

pub use adapter::*;
pub use adapter_registry::*;
pub use conversation::*;
pub use credentials::*;
pub use delivery::*;
pub use http_client::*;
pub use message::*;
pub use message_log::*;
pub use pipeline::*;
pub use router::*;
pub use signature::*;
