//! Server side of the tunnel
//!
//! For every connected peer the server keeps one [`burrow_router::PacketRouter`]
//! and listens to the peer's app events. Each added app gets a local TCP
//! listener; every connection accepted there becomes a session bridged over
//! the peer. When the peer goes away, all of its listeners are closed.

pub mod config;
pub mod error;
pub mod exposer;
pub mod ports;
pub mod server;
pub mod task_tracker;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use exposer::{AppExposer, DefaultAppExposer, ExposedApp};
pub use ports::{
    PortAllocator, PortOpener, PredefinedPortAllocator, RandomPortAllocator, RangePortAllocator,
};
pub use server::Server;
pub use task_tracker::TaskTracker;
