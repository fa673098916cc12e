//! HTTP routes: static files, the live-reload client and its WebSocket.

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::ServerState;

/// WebSocket endpoint for notifications.
pub const WS_PATH: &str = "/__assetflow/ws";

/// Live-reload client script.
pub const CLIENT_PATH: &str = "/__assetflow/client.js";

const CLIENT_JS: &str = r#"(function () {
  var scheme = location.protocol === "https:" ? "wss://" : "ws://";
  function swap(path) {
    var found = false;
    document.querySelectorAll('link[rel="stylesheet"]').forEach(function (link) {
      var url = new URL(link.href);
      if (decodeURIComponent(url.pathname) === decodeURIComponent(path)) {
        url.searchParams.set("t", Date.now());
        link.href = url.toString();
        found = true;
      }
    });
    return found;
  }
  function connect() {
    var ws = new WebSocket(scheme + location.host + "/__assetflow/ws");
    ws.onmessage = function (event) {
      var msg = JSON.parse(event.data);
      if (msg.type === "inject") {
        var swapped = msg.paths.map(swap).some(Boolean);
        if (!swapped) location.reload();
      } else {
        location.reload();
      }
    };
    ws.onclose = function () {
      setTimeout(connect, 1000);
    };
  }
  connect();
})();
"#;

/// Build the router serving `state`'s base directory.
pub fn router(state: Arc<ServerState>) -> Router {
    let files = ServeDir::new(state.base_dir()).append_index_html_on_directories(true);

    Router::new()
        .route(WS_PATH, get(live_reload_ws))
        .route(CLIENT_PATH, get(client_script))
        .fallback_service(files)
        .layer(middleware::map_response(inject_client))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
}

async fn live_reload_ws(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (id, mut rx) = state.connect();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let json = match serde_json::to_string(&notification) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.disconnect(id);
}

/// Insert the client `<script>` before the closing body tag (or append it).
pub fn inject_snippet(html: &str) -> String {
    let tag = format!("<script src=\"{}\"></script>", CLIENT_PATH);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}{}", html, tag),
    }
}

async fn inject_client(response: Response) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/html"))
        .unwrap_or(false);
    // Partial and not-modified responses carry no full document
    if !is_html || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to buffer HTML response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_snippet(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}
