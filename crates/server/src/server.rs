//! The dev server: one axum router over the cache service, the profile
//! set and the reload room, plus the filesystem watcher feeding it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use kiln_cache::CacheService;
use kiln_core::constants::PROFILE_MANIFEST_FILENAME;
use kiln_core::{Error, Result};
use kiln_profile::ProfileSet;
use kiln_reload::{EventRoom, SourceWatcher};
use tokio::net::TcpListener;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::routes;

/// Correlation id attached to each request and echoed in error bodies.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<CacheService>,
    pub(crate) profiles: Arc<ProfileSet>,
    pub(crate) room: Arc<EventRoom>,
    pub(crate) project_root: PathBuf,
    pub(crate) cache_folder: String,
    pub(crate) watch: bool,
}

pub struct DevServer {
    config: ServerConfig,
    state: AppState,
}

impl DevServer {
    pub fn new(
        project_root: impl Into<PathBuf>,
        service: Arc<CacheService>,
        profiles: Arc<ProfileSet>,
        config: ServerConfig,
    ) -> Self {
        let room = Arc::new(EventRoom::new(
            config.max_connections,
            config.history_length,
        ));
        let state = AppState {
            service,
            profiles,
            room,
            project_root: project_root.into(),
            cache_folder: config.cache_folder.clone(),
            watch: config.watch,
        };
        Self { config, state }
    }

    /// The reload room, for pushing events from outside the watcher.
    pub fn room(&self) -> Arc<EventRoom> {
        Arc::clone(&self.state.room)
    }

    /// Builds the router serving compiled modules, reload events and
    /// project files. Exposed separately so tests can drive it in-process.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &format!("/{}/:folder/*path", self.config.cache_folder),
                get(routes::serve_compiled),
            )
            .fallback(get(routes::serve_project))
            .layer(middleware::from_fn(log_requests))
            .with_state(self.state.clone())
    }

    /// Writes the profile manifest under the cache root so runtimes can
    /// enumerate the available groups without asking the server.
    pub fn persist_profile_manifest(&self) -> Result<PathBuf> {
        let path = self
            .state
            .service
            .cache_root()
            .join(PROFILE_MANIFEST_FILENAME);
        let json = serde_json::to_string_pretty(self.state.profiles.as_ref())?;
        kiln_utils::write_atomic_string(&path, &json)?;
        debug!(path = %path.display(), "profile manifest written");
        Ok(path)
    }

    /// Binds the listener and serves until the process stops.
    pub async fn start(self) -> Result<()> {
        self.persist_profile_manifest()?;
        if self.config.watch {
            self.spawn_watch_pump()?;
        }
        let listener = TcpListener::bind(&self.config.listen).await.map_err(|e| {
            Error::configuration(format!("cannot bind '{}': {e}", self.config.listen))
        })?;
        info!(
            address = %self.config.listen,
            cache_folder = %self.config.cache_folder,
            groups = self.state.profiles.ids().len(),
            "dev server listening"
        );
        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::configuration(format!("server terminated: {e}")))
    }

    fn spawn_watch_pump(&self) -> Result<()> {
        let mut watcher = SourceWatcher::start(
            &self.state.project_root,
            vec![self.config.cache_folder.clone()],
            Duration::from_millis(self.config.debounce_ms),
        )?;
        let room = Arc::clone(&self.state.room);
        tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                debug!(path = %event.relative_path, "source file changed");
                if room.send_event("file-changed", &event.relative_path).is_none() {
                    break;
                }
            }
        });
        Ok(())
    }
}

/// Tags each request with a short id, echoes it back in `x-request-id`
/// and logs one line per request.
pub(crate) async fn log_requests(mut request: Request, next: Next) -> Response {
    let id = short_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let started = Instant::now();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    info!(
        id = %id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "{method} {path}"
    );
    response
}

fn short_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
