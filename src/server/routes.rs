use crate::server::registry::ChannelRegistry;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// 开发服务器路由：`ws_path` 为热重载通道，其余路径从输出目录提供静态文件
pub fn router(output_root: &Path, ws_path: &str, registry: ChannelRegistry) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .fallback_service(ServeDir::new(output_root))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(registry)
}

async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(registry): State<ChannelRegistry>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, registry)),
        Err(_) => (StatusCode::BAD_REQUEST, "Expected websocket").into_response(),
    }
}

async fn handle_socket(mut socket: WebSocket, registry: ChannelRegistry) {
    let (id, mut rx) = registry.register();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // 连接表被清空（服务器重启或关闭）
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.remove(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::fs;
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::create_dir_all(dir.path().join("blog")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("blog/index.html"), "<h1>blog</h1>").unwrap();
        fs::write(dir.path().join("css/app.css"), "a{}").unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_files_and_directory_index() {
        let dir = site();
        let app = router(dir.path(), "/ws", ChannelRegistry::new());

        assert_eq!(get_path(app.clone(), "/").await, (StatusCode::OK, "<h1>home</h1>".into()));
        assert_eq!(
            get_path(app.clone(), "/blog/").await,
            (StatusCode::OK, "<h1>blog</h1>".into())
        );
        assert_eq!(get_path(app, "/css/app.css").await, (StatusCode::OK, "a{}".into()));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let dir = site();
        let app = router(dir.path(), "/ws", ChannelRegistry::new());
        let (status, _) = get_path(app, "/missing.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plain_request_to_ws_path_is_rejected() {
        let dir = site();
        let registry = ChannelRegistry::new();
        let app = router(dir.path(), "/ws", registry.clone());

        let (status, body) = get_path(app, "/ws").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Expected websocket");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn custom_ws_path_frees_default_path_for_static_files() {
        let dir = site();
        fs::write(dir.path().join("ws"), "static").unwrap();
        let app = router(dir.path(), "/__dino_ws", ChannelRegistry::new());

        assert_eq!(get_path(app.clone(), "/ws").await, (StatusCode::OK, "static".into()));
        let (status, _) = get_path(app, "/__dino_ws").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
