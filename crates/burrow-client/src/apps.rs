//! Sources of the apps a client exposes

use crate::error::{ClientError, ClientResult};
use burrow_proto::App;
use burrow_transport::{channel, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Added,
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStateChange {
    pub app: App,
    pub state: AppState,
}

impl AppStateChange {
    pub fn added(app: App) -> Self {
        Self {
            app,
            state: AppState::Added,
        }
    }

    pub fn withdrawn(app: App) -> Self {
        Self {
            app,
            state: AppState::Withdrawn,
        }
    }
}

/// Decides which local apps are exposed through the tunnel
pub trait AppStateManager: Send + Sync {
    fn changes(&self) -> Subscription<AppStateChange>;
}

/// Fixed set of apps, announced once
pub struct StaticAppStateManager {
    changes: Subscription<AppStateChange>,
}

impl StaticAppStateManager {
    pub fn new(apps: Vec<App>) -> Self {
        let (publisher, changes) = channel(apps.len().max(1));
        for app in apps {
            publisher.try_publish(AppStateChange::added(app));
        }
        Self { changes }
    }
}

impl AppStateManager for StaticAppStateManager {
    fn changes(&self) -> Subscription<AppStateChange> {
        self.changes.clone()
    }
}

/// Parse an `--expose` value
///
/// Accepted forms are `name=address`, `name=<name>,address=<address>`, and a
/// bare address that doubles as the app name.
pub fn parse_app_definition(definition: &str) -> ClientResult<App> {
    let invalid = |reason: &str| ClientError::InvalidAppDefinition {
        definition: definition.to_string(),
        reason: reason.to_string(),
    };

    let definition = definition.trim();
    if definition.is_empty() {
        return Err(invalid("empty definition"));
    }

    if !definition.contains('=') {
        if definition.contains(',') {
            return Err(invalid("expected key=value pairs"));
        }
        return Ok(App::new(definition, definition));
    }

    if !definition.contains(',') && !definition.starts_with("name=") && !definition.starts_with("address=") {
        let (name, address) = definition
            .split_once('=')
            .ok_or_else(|| invalid("expected name=address"))?;
        if name.is_empty() || address.is_empty() {
            return Err(invalid("both name and address are required"));
        }
        return Ok(App::new(name, address));
    }

    let mut name = None;
    let mut address = None;
    for field in definition.split(',') {
        match field.split_once('=') {
            Some(("name", value)) => name = Some(value),
            Some(("address", value)) => address = Some(value),
            Some((key, _)) => return Err(invalid(&format!("unknown field `{}`", key))),
            None => return Err(invalid("expected key=value pairs")),
        }
    }
    match (name, address) {
        (Some(name), Some(address)) if !name.is_empty() && !address.is_empty() => {
            Ok(App::new(name, address))
        }
        _ => Err(invalid("both name and address are required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_manager_announces_every_app() {
        let manager = StaticAppStateManager::new(vec![
            App::new("web", "127.0.0.1:8080"),
            App::new("db", "127.0.0.1:5432"),
        ]);
        let changes = manager.changes();

        let first = changes.recv().await.unwrap();
        assert_eq!(first.state, AppState::Added);
        assert_eq!(first.app.name, "web");
        let second = changes.recv().await.unwrap();
        assert_eq!(second.app.name, "db");
        assert!(changes.recv().await.is_none());
    }

    #[test]
    fn test_parse_name_equals_address() {
        let app = parse_app_definition("web=127.0.0.1:8080").unwrap();
        assert_eq!(app.name, "web");
        assert_eq!(app.address, "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_key_value_pairs() {
        let app = parse_app_definition("name=db,address=10.0.0.6:5432").unwrap();
        assert_eq!(app.name, "db");
        assert_eq!(app.address, "10.0.0.6:5432");

        let reordered = parse_app_definition("address=10.0.0.6:5432,name=db").unwrap();
        assert_eq!(reordered, app);
    }

    #[test]
    fn test_parse_bare_address() {
        let app = parse_app_definition("localhost:3000").unwrap();
        assert_eq!(app.name, "localhost:3000");
        assert_eq!(app.address, "localhost:3000");
    }

    #[test]
    fn test_parse_rejects_incomplete_definitions() {
        assert!(parse_app_definition("").is_err());
        assert!(parse_app_definition("web=").is_err());
        assert!(parse_app_definition("name=web").is_err());
        assert!(parse_app_definition("name=web,port=80").is_err());
        assert!(parse_app_definition("a,b").is_err());
    }
}
