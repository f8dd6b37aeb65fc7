//! Request handlers for the three surfaces the dev server exposes:
//! compiled modules under the cache folder, the reload event stream, and
//! raw project files for everything else.
//!
//! Compiled URLs follow `/<cache folder>/<out folder>/<group>/<module>`.
//! A URL that skips the group segment is answered with a redirect into the
//! group chosen for the caller's User-Agent, which is what makes the
//! `vary: User-Agent` header on compiled responses truthful.

use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use kiln_cache::{CompileStatus, ResolveRequest};
use kiln_compile::{map_asset_name, CompileOverrides, OutputFolderKind};
use kiln_core::Error;
use kiln_profile::CompileProfile;
use kiln_reload::ConnectRejection;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::{error_response, plain_error};
use crate::server::{AppState, RequestId};
use crate::ua::profile_for_agent;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Handler for `/<cache folder>/:folder/*path`.
pub(crate) async fn serve_compiled(
    State(state): State<AppState>,
    UrlPath((folder, path)): UrlPath<(String, String)>,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
) -> Response {
    let request_id = request_id.map(|Extension(id)| id.0);
    let folder_kind = match OutputFolderKind::from_folder_name(&folder) {
        Ok(kind) => kind,
        Err(error) => return error_response(&error, request_id),
    };

    let (first, rest) = match path.split_once('/') {
        Some((first, rest)) => (first, rest),
        None => (path.as_str(), ""),
    };
    let Some(profile) = state.profiles.by_id(first) else {
        return redirect_to_group(&state, &folder, &path, &headers);
    };
    if rest.is_empty() {
        let error = Error::invalid_request(format!(
            "compiled URL '/{}/{}/{}' names no module",
            state.cache_folder, folder, path
        ));
        return error_response(&error, request_id);
    }

    if let Some(module_path) = rest.strip_suffix(".map") {
        return serve_source_map(&state, folder_kind, profile, module_path, request_id).await;
    }
    serve_module(&state, folder_kind, profile, rest, &headers, request_id).await
}

async fn serve_module(
    state: &AppState,
    folder_kind: OutputFolderKind,
    profile: &CompileProfile,
    relative_path: &str,
    headers: &HeaderMap,
    request_id: Option<String>,
) -> Response {
    let mut request = ResolveRequest::new(relative_path, folder_kind);
    request.plugin_names = profile.plugin_names.clone();
    request.client_etag = client_etag(headers);
    let result = match state.service.resolve(request).await {
        Ok(result) => result,
        Err(error) => return error_response(&error, request_id),
    };

    let etag = format!("\"{}\"", result.input_etag);
    let location = state
        .service
        .cache_root()
        .join(&result.output_relative_location);

    // Not-modified only applies to verified cache hits; a fresh compile
    // always ships its body even when the etag happens to match.
    if result.client_match && result.status == CompileStatus::Cached {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        apply_cache_headers(response.headers_mut(), &etag, &location);
        return response;
    }

    let mut response = (StatusCode::OK, result.output).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(relative_path)),
    );
    apply_cache_headers(response_headers, &etag, &location);
    response
}

async fn serve_source_map(
    state: &AppState,
    folder_kind: OutputFolderKind,
    profile: &CompileProfile,
    module_path: &str,
    request_id: Option<String>,
) -> Response {
    // A directory can never carry a source map; refuse before touching the
    // cache so the branch index is not consulted for nonsense paths.
    let physical = state.project_root.join(module_path);
    if matches!(tokio::fs::metadata(&physical).await, Ok(meta) if meta.is_dir()) {
        let error = Error::permission_denied("read", format!("'{module_path}' is a directory"));
        return error_response(&error, request_id);
    }

    let asset_name = map_asset_name(module_path);
    match state
        .service
        .peek_asset(
            module_path,
            folder_kind,
            profile.plugin_names.clone(),
            &CompileOverrides::default(),
            &asset_name,
        )
        .await
    {
        Ok(Some(content)) => {
            let mut response = (StatusCode::OK, content).into_response();
            let response_headers = response.headers_mut();
            response_headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Ok(None) => plain_error(
            StatusCode::NOT_FOUND,
            format!("no compiled branch holds '{asset_name}' for '{module_path}'"),
            request_id,
        ),
        Err(error) => error_response(&error, request_id),
    }
}

fn redirect_to_group(
    state: &AppState,
    folder: &str,
    path: &str,
    headers: &HeaderMap,
) -> Response {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let profile = profile_for_agent(&state.profiles, agent);
    let location = format!("/{}/{}/{}/{}", state.cache_folder, folder, profile.id, path);
    debug!(
        agent = agent.unwrap_or("-"),
        group = %profile.id,
        "redirecting group-less compiled URL"
    );

    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response_headers.insert(header::LOCATION, value);
    }
    response_headers.insert(header::VARY, HeaderValue::from_static("User-Agent"));
    response
}

/// Fallback handler: the reload stream when asked for one, project files
/// otherwise.
pub(crate) async fn serve_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    request_id: Option<Extension<RequestId>>,
) -> Response {
    let request_id = request_id.map(|Extension(id)| id.0);
    if state.watch && wants_event_stream(&headers) {
        return reload_stream(&state, &headers);
    }
    serve_static(&state, uri.path(), request_id).await
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

fn reload_stream(state: &AppState, headers: &HeaderMap) -> Response {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    match state.room.connect(last_event_id) {
        Ok(connection) => {
            debug!(?last_event_id, "reload client connected");
            let stream = connection.into_stream().map(|event| {
                let mut out = Event::default().event(event.kind).data(event.data);
                if let Some(id) = event.id {
                    out = out.id(id.to_string());
                }
                Ok::<_, Infallible>(out)
            });
            Sse::new(stream)
                .keep_alive(
                    KeepAlive::new()
                        .interval(KEEP_ALIVE_INTERVAL)
                        .text("keep-alive"),
                )
                .into_response()
        }
        Err(rejection @ ConnectRejection::AtCapacity) => plain_error(
            StatusCode::SERVICE_UNAVAILABLE,
            rejection.to_string(),
            None,
        ),
        Err(ConnectRejection::Closed) => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn serve_static(state: &AppState, uri_path: &str, request_id: Option<String>) -> Response {
    let relative = uri_path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        let error =
            Error::permission_denied("read", format!("path '{uri_path}' escapes the project root"));
        return error_response(&error, request_id);
    }

    let target = state.project_root.join(relative);
    let meta = match tokio::fs::metadata(&target).await {
        Ok(meta) => meta,
        Err(e) => return error_response(&Error::file_system(&target, "stat", e), request_id),
    };
    if meta.is_dir() {
        let error =
            Error::permission_denied("read", format!("'{uri_path}' is a directory, not a file"));
        return error_response(&error, request_id);
    }

    match tokio::fs::read(&target).await {
        Ok(bytes) => {
            let mut response = (StatusCode::OK, bytes).into_response();
            let response_headers = response.headers_mut();
            response_headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(relative)),
            );
            response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => error_response(&Error::file_system(&target, "read", e), request_id),
    }
}

fn apply_cache_headers(headers: &mut HeaderMap, etag: &str, location: &Path) {
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::VARY, HeaderValue::from_static("User-Agent"));
    if let Ok(value) = HeaderValue::from_str(&location.to_string_lossy()) {
        headers.insert("x-location", value);
    }
}

fn client_etag(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::IF_NONE_MATCH)?.to_str().ok()?;
    let value = raw.trim().trim_start_matches("W/");
    Some(value.trim_matches('"').to_string())
}

fn content_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match extension {
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
