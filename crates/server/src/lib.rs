use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use clap::Parser;
use lorepin_engine::{new_id, Engine, EntityCache, ReferencePanel, SearchState};
use lorepin_protocol::{CompositeKey, Entity, EntityType, PanelView, Pin};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};


pub const DEFAULT_ADDR: &str = "127.0.0.1:39333";

#[derive(Debug, Clone, Parser)]
#[command(name = "lorepin-server", about = "Local API for the chapter reference panel")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "LOREPIN_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,
    /// SQLite database path. Defaults to ~/.lorepin/lorepin.db.
    #[arg(long, env = "LOREPIN_DB")]
    pub db: Option<PathBuf>,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(default_db_path)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lorepin")
        .join("lorepin.db")
}

/// Panels not touched for this long are dropped on the next mount. Their pins
/// are already persisted, so a client that comes back simply remounts.
pub const PANEL_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

struct PanelSlot {
    panel: ReferencePanel<Engine>,
    last_used: Instant,
}

type Panels = HashMap<String, PanelSlot>;
type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub struct AppState {
    pub engine: Engine,
    pub cache: EntityCache,
    panels: Mutex<Panels>,
    panel_ttl: Duration,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            cache: EntityCache::new(),
            panels: Mutex::new(HashMap::new()),
            panel_ttl: PANEL_IDLE_TTL,
        }
    }

    pub fn with_panel_ttl(mut self, ttl: Duration) -> Self {
        self.panel_ttl = ttl;
        self
    }

    fn lock_panels(&self) -> std::sync::MutexGuard<'_, Panels> {
        self.panels.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn panel_count(&self) -> usize {
        self.lock_panels().len()
    }

    /// Register a panel, dropping any that sat idle past the ttl.
    fn insert_panel(&self, panel_id: String, panel: ReferencePanel<Engine>) {
        let mut panels = self.lock_panels();
        let before = panels.len();
        let ttl = self.panel_ttl;
        panels.retain(|_, slot| slot.last_used.elapsed() < ttl);
        let evicted = before - panels.len();
        if evicted > 0 {
            tracing::debug!(evicted, "dropped idle panels");
        }
        panels.insert(
            panel_id,
            PanelSlot {
                panel,
                last_used: Instant::now(),
            },
        );
    }

    /// Run `f` on a panel after re-reading its chapter's pins, so every
    /// panel on a chapter works from the stored list.
    fn with_panel<T>(
        &self,
        panel_id: &str,
        f: impl FnOnce(&mut ReferencePanel<Engine>) -> T,
    ) -> Result<T, ApiError> {
        let mut panels = self.lock_panels();
        let slot = panels
            .get_mut(panel_id)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no panel {panel_id}")))?;
        slot.last_used = Instant::now();
        slot.panel.sync_pins();
        Ok(f(&mut slot.panel))
    }

    /// Apply `f` to a panel, then render it against the shared cache.
    fn update_panel(
        &self,
        panel_id: &str,
        f: impl FnOnce(&mut ReferencePanel<Engine>),
    ) -> ApiResult<PanelView> {
        self.with_panel(panel_id, |panel| {
            f(panel);
            Json(panel.view(&self.cache))
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rev", get(api_rev))
        .route(
            "/api/books/{book}/entities/{kind}",
            get(api_entities_list).post(api_entities_upsert),
        )
        .route(
            "/api/books/{book}/entities/{kind}/{id}",
            delete(api_entities_delete),
        )
        .route("/api/panels", post(api_panels_mount))
        .route(
            "/api/panels/{panel}",
            get(api_panel_get).delete(api_panel_unmount),
        )
        .route("/api/panels/{panel}/focus", post(api_panel_focus))
        .route("/api/panels/{panel}/search", put(api_panel_search))
        .route("/api/panels/{panel}/pin", post(api_panel_pin))
        .route("/api/panels/{panel}/unpin", post(api_panel_unpin))
        .route(
            "/api/panels/{panel}/sections/{kind}/toggle",
            post(api_panel_section_toggle),
        )
        .route("/api/panels/{panel}/list/toggle", post(api_panel_list_toggle))
        .route("/api/panels/{panel}/drag/start", post(api_panel_drag_start))
        .route("/api/panels/{panel}/drag/over", post(api_panel_drag_over))
        .route("/api/panels/{panel}/drag/end", post(api_panel_drag_end))
        .route("/api/panels/{panel}/drag/cancel", post(api_panel_drag_cancel))
        .with_state(Arc::new(state))
        // Local security: allow only loopback + Tailscale by default.
        .layer(middleware::from_fn(ip_allowlist))
        // Never use `Access-Control-Allow-Origin: *` here; any website open in the
        // browser could then read an author's unpublished notes.
        .layer(local_only_cors())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevOutput {
    pub rev: i64,
}

async fn api_rev(State(state): State<Arc<AppState>>) -> ApiResult<RevOutput> {
    let rev = state.engine.get_rev().map_err(internal)?;
    Ok(Json(RevOutput { rev }))
}

fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn parse_kind(kind: &str) -> Result<EntityType, ApiError> {
    kind.parse().map_err(bad_request)
}

fn parse_key(key: Option<String>) -> Result<Option<CompositeKey>, ApiError> {
    key.map(|k| k.parse::<CompositeKey>().map_err(bad_request))
        .transpose()
}

/// Re-read all five kinds for a book into the shared cache.
pub async fn refresh_book(state: &Arc<AppState>, book_id: &str) -> anyhow::Result<()> {
    let engine = state.engine.clone();
    let cache = state.cache.clone();
    let book_id = book_id.to_string();
    tokio::task::spawn_blocking(move || cache.fetch_all(&engine, &book_id)).await?;
    Ok(())
}

// ── Entities ────────────────────────────────────────────────────────────────

async fn api_entities_list(
    State(state): State<Arc<AppState>>,
    Path((book, kind)): Path<(String, String)>,
) -> ApiResult<Vec<Entity>> {
    let kind = parse_kind(&kind)?;
    let list = state.engine.list_entities(&book, kind).map_err(internal)?;
    Ok(Json(list))
}

async fn api_entities_upsert(
    State(state): State<Arc<AppState>>,
    Path((book, kind)): Path<(String, String)>,
    Json(entity): Json<Entity>,
) -> ApiResult<Vec<Entity>> {
    let kind = parse_kind(&kind)?;
    if entity.id.is_empty() {
        return Err(bad_request("entity id must not be empty"));
    }
    state
        .engine
        .upsert_entity(&book, kind, &entity)
        .map_err(internal)?;
    state
        .cache
        .fetch(&state.engine, &book, kind)
        .map_err(internal)?;
    Ok(Json(state.cache.get(&book, kind)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteOutput {
    pub deleted: bool,
}

async fn api_entities_delete(
    State(state): State<Arc<AppState>>,
    Path((book, kind, id)): Path<(String, String, String)>,
) -> ApiResult<DeleteOutput> {
    let kind = parse_kind(&kind)?;
    let deleted = state
        .engine
        .delete_entity(&book, kind, &id)
        .map_err(internal)?;
    state
        .cache
        .fetch(&state.engine, &book, kind)
        .map_err(internal)?;
    Ok(Json(DeleteOutput { deleted }))
}

// ── Panels ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MountInput {
    pub book_id: String,
    pub chapter_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MountOutput {
    pub panel_id: String,
    pub view: PanelView,
}

async fn api_panels_mount(
    State(state): State<Arc<AppState>>,
    Json(input): Json<MountInput>,
) -> ApiResult<MountOutput> {
    if input.book_id.is_empty() || input.chapter_id.is_empty() {
        return Err(bad_request("book_id and chapter_id are required"));
    }
    refresh_book(&state, &input.book_id)
        .await
        .map_err(internal)?;

    let panel = ReferencePanel::mount(state.engine.clone(), input.book_id, input.chapter_id);
    let view = panel.view(&state.cache);
    let panel_id = new_id("panel");
    state.insert_panel(panel_id.clone(), panel);
    tracing::debug!(%panel_id, chapter_id = %view.chapter_id, "panel mounted");
    Ok(Json(MountOutput { panel_id, view }))
}

async fn api_panel_get(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |_| {})
}

async fn api_panel_unmount(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state.lock_panels().remove(&panel_id);
    match removed {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, format!("no panel {panel_id}"))),
    }
}

/// Window regained focus: kick off a refresh and answer with the current view.
/// The refresh is not awaited; the client sees fresh data on its next read.
async fn api_panel_focus(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
) -> ApiResult<PanelView> {
    let book_id = state.with_panel(&panel_id, |panel| panel.book_id().to_string())?;
    let bg = state.clone();
    tokio::spawn(async move {
        if let Err(err) = refresh_book(&bg, &book_id).await {
            tracing::warn!(%book_id, error = %err, "focus refresh failed");
        }
    });
    state.update_panel(&panel_id, |_| {})
}

async fn api_panel_search(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(search): Json<SearchState>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |panel| panel.set_search(search))
}

async fn api_panel_pin(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(pin): Json<Pin>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |panel| {
        panel.pin(pin.kind, &pin.id);
    })
}

async fn api_panel_unpin(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(pin): Json<Pin>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |panel| {
        panel.unpin(pin.kind, &pin.id);
    })
}

async fn api_panel_section_toggle(
    State(state): State<Arc<AppState>>,
    Path((panel_id, kind)): Path<(String, String)>,
) -> ApiResult<PanelView> {
    let kind = parse_kind(&kind)?;
    state.update_panel(&panel_id, |panel| {
        panel.toggle_section(kind);
    })
}

async fn api_panel_list_toggle(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |panel| {
        panel.toggle_list();
    })
}

#[derive(Debug, Deserialize)]
pub struct DragStartInput {
    pub key: String,
    #[serde(default)]
    pub width: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct DragOverInput {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DragEndInput {
    #[serde(default)]
    pub target: Option<String>,
}

async fn api_panel_drag_start(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(input): Json<DragStartInput>,
) -> ApiResult<PanelView> {
    let key = input.key.parse::<CompositeKey>().map_err(bad_request)?;
    state.update_panel(&panel_id, |panel| {
        panel.drag_start(key, input.width);
    })
}

async fn api_panel_drag_over(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(input): Json<DragOverInput>,
) -> ApiResult<PanelView> {
    let key = parse_key(input.key)?;
    state.update_panel(&panel_id, |panel| panel.drag_over(key))
}

async fn api_panel_drag_end(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
    Json(input): Json<DragEndInput>,
) -> ApiResult<PanelView> {
    let target = parse_key(input.target)?;
    state.update_panel(&panel_id, |panel| {
        panel.drag_end(target);
    })
}

async fn api_panel_drag_cancel(
    State(state): State<Arc<AppState>>,
    Path(panel_id): Path<String>,
) -> ApiResult<PanelView> {
    state.update_panel(&panel_id, |panel| panel.drag_cancel())
}

// ── Serving ─────────────────────────────────────────────────────────────────

pub async fn serve(addr: SocketAddr, db_path: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, db_path, async {
        std::future::pending::<()>().await
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    db_path: PathBuf,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let engine = Engine::new(db_path);
    // Fail fast if sqlite is unavailable.
    engine.open()?;
    let app = build_router(AppState::new(engine));
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "lorepin server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    tracing::warn!(%ip, "rejected non-local peer");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    // Tailscale CGNAT range (100.64.0.0/10).
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (64..=127).contains(&o[1])
        }
        IpAddr::V6(_v6) => false,
    }
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };

    // Tauri WebView origin (production).
    if s == "tauri://localhost" {
        return true;
    }

    // Vite dev server and local reverse proxies.
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // Origin is just scheme://host[:port]
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}
