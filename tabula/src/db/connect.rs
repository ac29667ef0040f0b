use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use axum::http::HeaderMap;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::conf::WarehouseConf;
use crate::errors::EditorError;

pub const ACCESS_TOKEN_HEADER: &str = "x-forwarded-access-token";
pub const FORWARDED_EMAIL_HEADER: &str = "x-forwarded-email";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    token: String,
}

impl Credential {
    pub fn new(user: &str, token: &str) -> Self {
        Self {
            user: user.to_string(),
            token: token.to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn token_digest(&self) -> blake3::Hash {
        blake3::hash(self.token.as_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Server address, routing path and credential for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub routing_path: String,
    pub credential: Credential,
}

impl ConnectionSpec {
    fn options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.routing_path)
            .username(&self.credential.user)
            .password(self.credential.token())
            .application_name("tabula")
    }
}

struct CachedPool {
    token: blake3::Hash,
    pool: PgPool,
}

/// Hands out one lazily connected pool per user. A user arriving with a new
/// token gets a fresh pool and the old one is closed.
pub struct Connector {
    conf: WarehouseConf,
    pools: Mutex<HashMap<String, CachedPool>>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.conf.host)
            .field("port", &self.conf.port)
            .field("warehouse_id", &self.conf.warehouse_id)
            .field("pools", &self.pools.lock().len())
            .finish()
    }
}

/// Lets in-flight queries on `pool` finish, then closes its connections.
fn close_in_background(pool: PgPool) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { pool.close().await });
        }
        Err(_) => drop(pool),
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl Connector {
    pub fn new(conf: WarehouseConf) -> Self {
        Self {
            conf,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Forwarded user token first, then the static fallback token.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Credential, EditorError> {
        if self.conf.forward_access_token {
            if let Some(token) = header_str(headers, ACCESS_TOKEN_HEADER) {
                let user = header_str(headers, FORWARDED_EMAIL_HEADER).unwrap_or(&self.conf.user);
                return Ok(Credential::new(user, token));
            }
        }
        self.static_credential().ok_or(EditorError::Unauthorized)
    }

    pub fn static_credential(&self) -> Option<Credential> {
        self.conf
            .token
            .as_deref()
            .map(|token| Credential::new(&self.conf.user, token))
    }

    pub fn spec(&self, credential: &Credential) -> ConnectionSpec {
        ConnectionSpec {
            host: self.conf.host.clone(),
            port: self.conf.port,
            routing_path: self.conf.warehouse_id.clone(),
            credential: credential.clone(),
        }
    }

    pub fn pool(&self, credential: &Credential) -> PgPool {
        let token = credential.token_digest();
        let mut pools = self.pools.lock();
        if let Some(cached) = pools.get(&credential.user) {
            if cached.token == token {
                return cached.pool.clone();
            }
        }

        tracing::info!(user = %credential.user, "opening warehouse pool");
        let pool = PgPoolOptions::new()
            .max_connections(self.conf.max_connections)
            .acquire_timeout(Duration::from_secs(self.conf.acquire_timeout_secs))
            .connect_lazy_with(self.spec(credential).options());
        let replaced = pools.insert(
            credential.user.clone(),
            CachedPool {
                token,
                pool: pool.clone(),
            },
        );
        drop(pools);

        if let Some(stale) = replaced {
            tracing::info!(user = %credential.user, "token rotated, closing previous pool");
            close_in_background(stale.pool);
        }
        pool
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }
}
