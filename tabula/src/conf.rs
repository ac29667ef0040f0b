use serde::{Deserialize, Serialize};

use crate::errors::EditorError;

/// Where the store lives and how requests authenticate against it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WarehouseConf {
    pub host: String,

    pub port: u16,

    /// Routing identifier; selects the database on the server.
    pub warehouse_id: String,

    /// User for the static credential, and for forwarded tokens that arrive
    /// without a forwarded identity.
    pub user: String,

    #[serde(skip_serializing)]
    pub token: Option<String>,

    pub forward_access_token: bool,

    pub max_connections: u32,

    pub acquire_timeout_secs: u64,
}

impl Default for WarehouseConf {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            warehouse_id: "".to_string(),
            user: "postgres".to_string(),
            token: None,
            forward_access_token: true,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EditorConf {
    pub host: String,

    pub port: u16,

    pub title: String,

    pub catalog: String,

    pub schema: String,

    pub log_init: bool,

    pub warehouse: WarehouseConf,
}

impl Default for EditorConf {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            title: "Configuration Editor".to_string(),
            catalog: "".to_string(),
            schema: "".to_string(),
            log_init: true,
            warehouse: WarehouseConf::default(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl EditorConf {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        #[cfg(test)]
        {
            dotenvy::from_filename_override(".env.test").ok();
        }

        #[cfg(all(debug_assertions, not(test)))]
        {
            dotenvy::from_filename_override(".env.dev").ok();
        }

        #[cfg(not(any(debug_assertions, test)))]
        {
            dotenvy::from_filename_override(".env.prod").ok();
        }

        let defaults = Self::default();
        let warehouse_defaults = WarehouseConf::default();

        let warehouse = WarehouseConf {
            host: env_or("WAREHOUSE_HOST", &warehouse_defaults.host),
            port: env_parse("WAREHOUSE_PORT", warehouse_defaults.port),
            warehouse_id: env_or("WAREHOUSE_ID", ""),
            user: env_or("WAREHOUSE_USER", &warehouse_defaults.user),
            token: std::env::var("WAREHOUSE_TOKEN").ok().filter(|t| !t.is_empty()),
            forward_access_token: env_flag(
                "FORWARD_ACCESS_TOKEN",
                warehouse_defaults.forward_access_token,
            ),
            max_connections: env_parse("MAX_CONNECTIONS", warehouse_defaults.max_connections),
            acquire_timeout_secs: env_parse(
                "ACQUIRE_TIMEOUT_SECS",
                warehouse_defaults.acquire_timeout_secs,
            ),
        };

        Self {
            host: env_or("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port),
            title: env_or("APP_TITLE", &defaults.title),
            catalog: env_or("EDITOR_CATALOG", ""),
            schema: env_or("EDITOR_SCHEMA", ""),
            warehouse,
            ..defaults
        }
    }

    /// Startup check. Every failure here is fatal.
    pub fn validate(&self) -> Result<(), EditorError> {
        if self.warehouse.warehouse_id.trim().is_empty() {
            return Err(EditorError::Config("WAREHOUSE_ID must be set".to_string()));
        }
        if self.catalog.trim().is_empty() {
            return Err(EditorError::Config("EDITOR_CATALOG must be set".to_string()));
        }
        if self.schema.trim().is_empty() {
            return Err(EditorError::Config("EDITOR_SCHEMA must be set".to_string()));
        }
        if !self.warehouse.forward_access_token && self.warehouse.token.is_none() {
            return Err(EditorError::Config(
                "no credential source: enable FORWARD_ACCESS_TOKEN or set WAREHOUSE_TOKEN"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
