pub mod broadcast;
pub mod config;
pub mod connection;
pub mod frames;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod server;

pub use broadcast::{spawn_bridge, Broadcaster};
pub use config::ServerConfig;
pub use registry::{ConnectionRegistry, RegistryError};
pub use server::{start, AppState, ServerHandle};
