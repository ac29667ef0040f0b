use std::net::{SocketAddr, ToSocketAddrs as _};
use std::sync::Arc;
use std::time::Duration;

use argh;
use axum::Router;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::cmd::{EditorCommand, NestedCommand};
use crate::conf::EditorConf;
use crate::db::{self, Connector, DbPool};
use crate::editor::SessionStore;
use crate::errors::EditorError;
use crate::{views, watch};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

/// Sessions untouched for this long are forgotten.
const SESSION_MAX_IDLE: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Error)]
pub enum SiteError {
    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Template rendering error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] db::DbError),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub struct SiteBuilder {
    conf: EditorConf,
    session_max_idle: Duration,
}

impl SiteBuilder {
    fn new(conf: EditorConf) -> Self {
        Self {
            conf,
            session_max_idle: SESSION_MAX_IDLE,
        }
    }

    pub fn session_max_idle(mut self, max_idle: Duration) -> Self {
        self.session_max_idle = max_idle;
        self
    }

    /// Parses the command line, applies its overrides and runs the command.
    pub async fn run(mut self) -> Result<(), SiteError> {
        let cmd: EditorCommand = argh::from_env();
        if let NestedCommand::Serve(serve) = &cmd.nested {
            if let Some(host) = &serve.host {
                self.conf.host = host.clone();
            }
            if let Some(port) = serve.port {
                self.conf.port = port;
            }
        }
        let site = self.build()?;
        site.run_command(cmd).await
    }

    /// Validates the configuration and assembles the site. No connection is
    /// made here; pools open lazily on the first request per credential.
    pub fn build(self) -> Result<Site, SiteError> {
        self.conf.validate()?;

        let mut env = minijinja::Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;

        let connector = Connector::new(self.conf.warehouse.clone());

        let site = Site {
            inner: Arc::new(SiteInner {
                conf: self.conf,
                connector,
                sessions: SessionStore::new(self.session_max_idle),
                template_env: env,
            }),
        };

        Ok(site)
    }
}

#[derive(Debug)]
struct SiteInner {
    conf: EditorConf,
    connector: Connector,
    sessions: SessionStore,
    template_env: minijinja::Environment<'static>,
}

#[derive(Debug, Clone)]
pub struct Site {
    inner: Arc<SiteInner>,
}

impl Site {
    pub fn builder(conf: EditorConf) -> SiteBuilder {
        SiteBuilder::new(conf)
    }

    pub fn conf(&self) -> &EditorConf {
        &self.inner.conf
    }

    pub fn connector(&self) -> &Connector {
        &self.inner.connector
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn render_template<S: serde::Serialize>(
        &self,
        template_name: &str,
        context: &S,
    ) -> Result<String, minijinja::Error> {
        self.inner
            .template_env
            .get_template(template_name)?
            .render(context)
    }

    pub fn router(&self) -> Router {
        views::router()
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    async fn serve_forever(self, verbose: bool) -> Result<(), SiteError> {
        let host = self.inner.conf.host.clone();
        let port = self.inner.conf.port;

        let addr: SocketAddr = format!("{}:{}", host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut iter| iter.next())
            .ok_or_else(|| {
                SiteError::ConfigError(format!(
                    "Failed to resolve address for {}:{}. Ensure the address is valid.",
                    host, port
                ))
            })?;

        let listener = tokio::net::TcpListener::bind(addr).await?;

        if verbose {
            println!("Server running at http://{}", addr);
        }
        tracing::info!(
            %addr,
            catalog = %self.inner.conf.catalog,
            schema = %self.inner.conf.schema,
            "table editor listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(watch::shutdown_signal())
            .await?;

        Ok(())
    }

    /// Prints every table of the configured schema with its primary key,
    /// using the static credential.
    async fn print_tables(&self) -> Result<(), SiteError> {
        let credential = self.inner.connector.static_credential().ok_or_else(|| {
            SiteError::ConfigError("listing tables needs WAREHOUSE_TOKEN".to_string())
        })?;
        let pool = self.inner.connector.pool(&credential);
        let db = DbPool::new(&pool);
        let conf = &self.inner.conf;

        for name in db::list_tables(db, &conf.catalog, &conf.schema).await? {
            let primary_keys =
                db::primary_key_columns(db, &name.catalog, &name.schema, &name.table).await?;
            if primary_keys.is_empty() {
                println!("{}\tread-only", name);
            } else {
                println!("{}\t({})", name, primary_keys.join(", "));
            }
        }
        Ok(())
    }

    pub async fn run_command(self, cmd: EditorCommand) -> Result<(), SiteError> {
        if self.inner.conf.log_init {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
        match cmd.nested {
            NestedCommand::Tables(_) => {
                self.print_tables().await?;
            }
            NestedCommand::Serve(_) => {
                self.serve_forever(cmd.verbose).await?;
            }
        }
        Ok(())
    }
}
