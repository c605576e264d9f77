/// Convo - real-time conversation core
///
/// Keeps one conversation's message list in sync between locally issued
/// mutations (send, edit, delete, pin, react) and the remote change feed.

pub mod change_feed;
pub mod cli_app;
pub mod config;
pub mod edit_policy;
pub mod error;
pub mod message_store;
pub mod messenger_types;
pub mod mutation_gateway;
pub mod reactions;
pub mod remote;
pub mod session;
pub mod sled_backend;

pub use config::Config;
pub use error::{ChatError, Result};
pub use message_store::{MessageStore, SharedMessageStore, StoreEvent};
pub use messenger_types::{ConversationScope, Message, MessagePatch, Reaction, SenderRole};
pub use mutation_gateway::{Delivery, MutationGateway};
pub use session::ConversationSession;
pub use sled_backend::SledBackend;
