mod config;
mod errors;
mod server;

pub mod hub;
pub mod snapshot;
pub mod store;

pub use config::*;
pub use errors::*;
pub use server::*;

pub use hub::message::ClientMessage;
pub use hub::message::ServerMessage;
pub use hub::ConnectionHub;
pub use hub::ConnectionId;
pub use store::Store;
pub use store::StoreUser;
pub use store::Subscription;
pub use store::SubscriptionMode;
