use crate::catalog::{PAGE_SIZE, fetch_catalog, parse_emoji_page};
use crate::client::{Credentials, MattermostApi, MattermostClient, build_http_client};
use crate::config::{DEFAULT_WEB_DELAY_MS, local_defaults, process_env};
use crate::dispatch::{DispatchReport, dispatch};
use crate::presets::{Preset, PresetStore, PresetSummary};
use crate::search::{
    EmojiRecord, MAX_LIMIT, SearchResult, clamp_limit, clamp_offset, normalize_query, search,
};
use crate::{CatalogCache, Error};
use askama::Template;
use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequest, Path as UrlPath, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use include_dir::{Dir, include_dir};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;
const MAX_LIST_PAGE_SIZE: f64 = 1000.0;

static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Server-lifetime state. The emoji index cache starts empty and only changes through
/// search/reindex; credentials arrive with each request and are never kept.
pub struct AppState {
    pub http: reqwest::Client,
    pub catalog: CatalogCache,
    pub presets: PresetStore,
    pub local_config: PathBuf,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub presets_path: PathBuf,
    pub local_config_path: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], crate::config::DEFAULT_WEB_PORT)),
            presets_path: PathBuf::from("presets.json"),
            local_config_path: PathBuf::from(crate::config::LOCAL_CONFIG_FILE),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
    Client(Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
            WebError::Client(err) => write!(f, "client setup failed: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

impl From<Error> for WebError {
    fn from(value: Error) -> Self {
        WebError::Client(value)
    }
}

impl AppState {
    pub fn new(config: &WebConfig) -> Result<Self, WebError> {
        Ok(Self {
            http: build_http_client()?,
            catalog: CatalogCache::new(),
            presets: PresetStore::new(config.presets_path.clone()),
            local_config: config.local_config_path.clone(),
        })
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let state = Arc::new(AppState::new(&config)?);
    let router = build_router(state);
    info!(
        %config.addr,
        presets = %config.presets_path.display(),
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    info!("Mattermost reaction UI running at http://{}", config.addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Auth { .. } => StatusCode::UNAUTHORIZED,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Http(_) | Error::Io(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

/// JSON body extractor whose rejections use the `{ "error": .. }` shape.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// Accepts any JSON number, or a string holding one, as browser forms send them.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(number.filter(|value| value.is_finite()))
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/assets/*path", get(asset))
        .route("/api/health", get(health))
        .route("/api/local-config", get(api_local_config))
        .route("/api/emoji/list", post(api_emoji_list))
        .route("/api/emoji/image/:id", get(api_emoji_image))
        .route("/api/emoji/search", post(api_emoji_search))
        .route("/api/emoji/reindex", post(api_emoji_reindex))
        .route("/api/reactions/bulk", post(api_reactions_bulk))
        .route("/api/presets", get(api_presets_list).post(api_presets_save))
        .route(
            "/api/presets/:name",
            get(api_presets_get).delete(api_presets_delete),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Builds a per-request client over the shared connection pool.
fn connect(
    state: &AppState,
    base_url: Option<&str>,
    session_cookie: Option<&str>,
) -> Result<MattermostClient, ApiError> {
    let base_url = base_url.map(str::trim).unwrap_or_default();
    let session_cookie = session_cookie.map(str::trim).unwrap_or_default();
    if base_url.is_empty() || session_cookie.is_empty() {
        return Err(ApiError::bad_request("baseUrl and sessionCookie are required"));
    }
    Ok(MattermostClient::with_http(
        state.http.clone(),
        base_url,
        Credentials::SessionCookie(session_cookie.to_string()),
    )?)
}

async fn home() -> impl IntoResponse {
    let template = HomeTemplate {
        version: env!("CARGO_PKG_VERSION"),
        default_delay_ms: DEFAULT_WEB_DELAY_MS,
        max_limit: MAX_LIMIT,
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
}

fn render_error_page(message: impl Into<String>) -> String {
    let message = message.into();
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head><meta charset="utf-8" /><title>Mattermost Reactions • Error</title></head>
  <body><main><h1>Something went wrong</h1><pre>{escaped}</pre></main></body>
</html>"#
    )
}

async fn asset(UrlPath(path): UrlPath<String>) -> Response {
    let Some(file) = ASSETS.get_file(&path) else {
        return ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("no asset {path:?}"),
        }
        .into_response();
    };
    let content_type = match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("js") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("svg") => mime::IMAGE_SVG,
        Some("html") => mime::TEXT_HTML_UTF_8,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    (
        [(header::CONTENT_TYPE, content_type.as_ref().to_string())],
        file.contents(),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": "mm-reactions-web" }))
}

async fn api_local_config(State(state): State<SharedState>) -> impl IntoResponse {
    Json(local_defaults(&state.local_config, &process_env))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest {
    base_url: Option<String>,
    session_cookie: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    per_page: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    page: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    count: usize,
    items: Vec<EmojiRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_more: Option<bool>,
}

async fn api_emoji_list(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<ListRequest>,
) -> Result<Json<ListResponse>, ApiError> {
    let client = connect(&state, req.base_url.as_deref(), req.session_cookie.as_deref())?;
    let per_page = match req.per_page {
        Some(value) if value > 0.0 => value.clamp(1.0, MAX_LIST_PAGE_SIZE) as usize,
        _ => PAGE_SIZE,
    };

    if let Some(page) = req.page {
        let page = page.max(0.0) as usize;
        let reply = client.emoji_page(page, per_page, true).await?;
        if !reply.is_success() {
            return Err(ApiError {
                status: StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY),
                message: format!("emoji list failed: {} {}", reply.status, reply.body),
            });
        }
        let (row_count, rows) = parse_emoji_page(&reply.body)?;
        let items: Vec<EmojiRecord> = rows.iter().map(|emoji| emoji.record()).collect();
        return Ok(Json(ListResponse {
            count: items.len(),
            items,
            page: Some(page),
            per_page: Some(per_page),
            has_more: Some(row_count == per_page),
        }));
    }

    let items: Vec<EmojiRecord> = fetch_catalog(&client, per_page)
        .await?
        .iter()
        .map(|emoji| emoji.record())
        .collect();
    Ok(Json(ListResponse {
        count: items.len(),
        items,
        page: None,
        per_page: None,
        has_more: None,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageParams {
    base_url: Option<String>,
    session_cookie: Option<String>,
}

/// Streams the upstream image through with its status and content type.
async fn api_emoji_image(
    State(state): State<SharedState>,
    UrlPath(id): UrlPath<String>,
    Query(params): Query<ImageParams>,
) -> Result<Response, ApiError> {
    let client = connect(
        &state,
        params.base_url.as_deref(),
        params.session_cookie.as_deref(),
    )?;
    if id.trim().is_empty() {
        return Err(ApiError::bad_request("emoji id is required"));
    }
    let upstream = client
        .emoji_image(&id)
        .await
        .map_err(|err| ApiError::bad_gateway(format!("upstream error: {err}")))?;
    let mut builder = Response::builder().status(upstream.status());
    if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, content_type.clone());
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|err| ApiError::internal(err.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    base_url: Option<String>,
    session_cookie: Option<String>,
    query: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    limit: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    offset: Option<f64>,
    #[serde(default)]
    rebuild: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchResponse {
    #[serde(flatten)]
    result: SearchResult,
    count: usize,
}

impl From<SearchResult> for SearchResponse {
    fn from(result: SearchResult) -> Self {
        Self {
            count: result.items.len(),
            result,
        }
    }
}

async fn api_emoji_search(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let client = connect(&state, req.base_url.as_deref(), req.session_cookie.as_deref())?;
    let limit = clamp_limit(req.limit.map(|value| value as i64));
    let offset = clamp_offset(req.offset.map(|value| value as i64));
    let query = req.query.unwrap_or_default();
    if normalize_query(&query).is_empty() {
        return Ok(Json(SearchResult::empty(limit, offset).into()));
    }
    let index = state
        .catalog
        .get_or_build(&client, client.base_url(), req.rebuild)
        .await?;
    Ok(Json(search(&index, &query, limit, offset).into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReindexRequest {
    base_url: Option<String>,
    session_cookie: Option<String>,
}

async fn api_emoji_reindex(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<ReindexRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let client = connect(&state, req.base_url.as_deref(), req.session_cookie.as_deref())?;
    let index = state
        .catalog
        .get_or_build(&client, client.base_url(), true)
        .await?;
    Ok(Json(json!({ "rebuilt": true, "count": index.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    base_url: Option<String>,
    session_cookie: Option<String>,
    post_id: Option<String>,
    emojis: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_number")]
    delay_ms: Option<f64>,
}

async fn api_reactions_bulk(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<BulkRequest>,
) -> Result<Json<DispatchReport>, ApiError> {
    let post_id = req.post_id.as_deref().map(str::trim).unwrap_or_default();
    let (Some(emojis), false) = (req.emojis.as_ref(), post_id.is_empty()) else {
        return Err(ApiError::bad_request(
            "baseUrl, sessionCookie, postId and emojis[] are required",
        ));
    };
    let client = connect(&state, req.base_url.as_deref(), req.session_cookie.as_deref())?;
    let delay_ms = req
        .delay_ms
        .map_or(DEFAULT_WEB_DELAY_MS, |value| value.max(0.0) as u64);
    let delay = Duration::from_millis(delay_ms);
    let report = dispatch(&client, post_id, emojis, delay).await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize, Deserialize)]
struct PresetListResponse {
    names: Vec<PresetSummary>,
}

async fn api_presets_list(
    State(state): State<SharedState>,
) -> Result<Json<PresetListResponse>, ApiError> {
    Ok(Json(PresetListResponse {
        names: state.presets.list()?,
    }))
}

async fn api_presets_get(
    State(state): State<SharedState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Json<Preset>, ApiError> {
    Ok(Json(state.presets.get(&name)?))
}

#[derive(Debug, Deserialize)]
struct SavePresetRequest {
    name: Option<String>,
    emojis: Option<Vec<String>>,
}

async fn api_presets_save(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<SavePresetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = req.name.unwrap_or_default();
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("a preset name is required"));
    }
    let emojis = req
        .emojis
        .ok_or_else(|| ApiError::bad_request("emojis[] array is required"))?;
    let saved = state.presets.put(&name, &emojis)?;
    Ok(Json(
        json!({ "ok": true, "name": saved.name, "count": saved.count }),
    ))
}

async fn api_presets_delete(
    State(state): State<SharedState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.presets.delete(&name)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Mattermost Reactions</title>
    <link rel="stylesheet" href="/assets/app.css" />
  </head>
  <body data-default-delay="{{ default_delay_ms }}" data-max-limit="{{ max_limit }}">
    <main class="page">
      <div class="stack">
        <header>
          <p class="eyebrow">mm-reactions v{{ version }}</p>
          <h1>Bulk emoji reactions</h1>
        </header>

        <section id="connection" class="panel">
          <h2>Connection</h2>
          <label>Base URL <input id="baseUrl" placeholder="https://chat.example.com" /></label>
          <label>Session cookie <input id="sessionCookie" type="password" placeholder="MMAUTHTOKEN=...; MMCSRF=..." /></label>
          <div class="actions">
            <button id="loadPage">Browse emoji</button>
            <button id="reindex">Rebuild index</button>
          </div>
        </section>

        <section id="browser" class="panel">
          <h2>Emoji</h2>
          <input id="search" placeholder="Search all emoji (e.g. :party)" autocomplete="off" />
          <div class="actions">
            <button id="prevPage">Previous</button>
            <span id="emojiCount"></span>
            <button id="nextPage">Next</button>
          </div>
          <div id="emojiGrid" class="grid"></div>
        </section>

        <section id="queue" class="panel">
          <h2>Queue</h2>
          <p class="hint">Click a queued emoji to remove it. Duplicates are allowed and sent in order.</p>
          <div id="selected" class="queue"></div>
          <label>Add by name <input id="manualNames" placeholder=":tada::heart: or tada, heart" /></label>
          <div class="actions">
            <button id="addManual">Add</button>
            <button id="clearQueue">Clear</button>
          </div>
          <div class="actions">
            <select id="presetSelect"></select>
            <button id="loadPreset">Load preset</button>
            <button id="deletePreset">Delete preset</button>
          </div>
          <div class="actions">
            <input id="presetName" placeholder="Preset name" />
            <button id="savePreset">Save queue as preset</button>
          </div>
        </section>

        <section id="send" class="panel">
          <h2>Send</h2>
          <label>Post ID <input id="postId" /></label>
          <label>Delay (ms) <input id="delayMs" type="number" min="0" value="{{ default_delay_ms }}" /></label>
          <button id="sendReactions">Add reactions</button>
          <pre id="log"></pre>
        </section>
      </div>
    </main>
    <script src="/assets/app.js"></script>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate {
    version: &'static str,
    default_delay_ms: u64,
    max_limit: usize,
}
