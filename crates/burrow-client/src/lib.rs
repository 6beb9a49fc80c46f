//! Client side of the tunnel
//!
//! The client announces its local apps to the server peer and, for every
//! session the server opens, dials the app's local address and bridges the
//! connection over the peer.

pub mod apps;
pub mod config;
pub mod error;
pub mod exposer;
pub mod registry;

pub use apps::{
    parse_app_definition, AppState, AppStateChange, AppStateManager, StaticAppStateManager,
};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use exposer::Exposer;
pub use registry::{AppAddressRegistry, AppConnection, AppConnectionRegistry};
