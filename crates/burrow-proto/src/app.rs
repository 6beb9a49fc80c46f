//! Exposed application descriptor

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named network endpoint exposed by one peer
///
/// Values are never mutated in place; the `with_*` methods return
/// derived copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub address: String,
    /// Name of the peer exposing the app, empty for local apps
    #[serde(default)]
    pub peer: String,
    #[serde(default)]
    pub original_port: u16,
    #[serde(default)]
    pub target_labels: String,
}

impl App {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_address(&self, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..self.clone()
        }
    }

    pub fn with_peer(&self, peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            ..self.clone()
        }
    }

    pub fn with_original_port(&self, original_port: u16) -> Self {
        Self {
            original_port,
            ..self.clone()
        }
    }

    pub fn with_target_labels(&self, target_labels: impl Into<String>) -> Self {
        Self {
            target_labels: target_labels.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.peer.is_empty() {
            write!(f, "{} ({})", self.name, self.address)
        } else {
            write!(f, "{}/{} ({})", self.peer, self.name, self.address)
        }
    }
}
