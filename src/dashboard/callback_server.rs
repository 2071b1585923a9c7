//! Loopback HTTP server hosting the OAuth callback page.
//!
//! The third party redirects the popup to `/twitter/callback?oauth_token&oauth_verifier`.
//! While a handshake is listening on the bus the page relays the pair to the
//! opener and closes itself; otherwise it redirects to `/`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::errors::DashboardError;
use super::popup::{handle_callback, CallbackAction, CallbackQuery, MessageBus, Opener};

pub const CALLBACK_PATH: &str = "/twitter/callback";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const CLOSE_PAGE: &str = r#"<!doctype html>
<html><body style="font-family:sans-serif;text-align:center;margin-top:20vh">
<p>Twitter connected. You can close this window.</p>
<script>window.close();</script>
</body></html>"#;

const WAITING_PAGE: &str = r#"<!doctype html>
<html><body style="font-family:sans-serif;text-align:center;margin-top:20vh">
<p>Connecting to Twitter...</p>
</body></html>"#;

const HOME_PAGE: &str = r#"<!doctype html>
<html><body style="font-family:sans-serif;text-align:center;margin-top:20vh">
<p>botdeck dashboard. Return to your terminal to manage your bot.</p>
</body></html>"#;

#[derive(Clone)]
struct CallbackState {
    bus: MessageBus,
    /// Used when the request carries no `Host` header.
    origin: String,
}

pub fn router(bus: MessageBus, origin: String) -> Router {
    Router::new()
        .route("/", get(home))
        .route(CALLBACK_PATH, get(callback))
        .with_state(CallbackState { bus, origin })
}

async fn home() -> Html<&'static str> {
    Html(HOME_PAGE)
}

async fn callback(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    // The opener exists only while a handshake has a listener registered.
    let opener = (state.bus.listener_count() > 0).then(|| Opener {
        bus: state.bus.clone(),
        origin: served_origin(&headers).unwrap_or_else(|| state.origin.clone()),
    });

    match handle_callback(&query, opener.as_ref()) {
        CallbackAction::PostedToOpener => {
            info!("🔁 OAuth callback relayed to opener");
            Html(CLOSE_PAGE).into_response()
        }
        CallbackAction::ReturnToDashboard => {
            warn!("🔁 OAuth callback with no waiting opener — redirecting home");
            Redirect::to("/").into_response()
        }
        CallbackAction::Waiting => Html(WAITING_PAGE).into_response(),
    }
}

/// Origin the page was actually served from, as the browser sees it.
fn served_origin(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?.trim();
    (!host.is_empty()).then(|| format!("http://{host}"))
}

/// Running callback server. Dropping the handle leaves it running; call
/// [`CallbackServer::shutdown`] for a graceful stop.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `addr` and serve. Relayed messages carry the origin from the
    /// request's `Host`; `origin` (default: the bound address) covers requests
    /// without one.
    pub async fn start(
        addr: SocketAddr,
        bus: MessageBus,
        origin: Option<String>,
    ) -> Result<Self, DashboardError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DashboardError::transport(format!("bind {addr}: {e}")))?;
        let local_addr = listener.local_addr().map_err(DashboardError::transport)?;
        let origin = origin.unwrap_or_else(|| format!("http://{local_addr}"));
        let app = router(bus, origin);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!("🔁 Callback server stopped: {}", e);
            }
        });
        info!("🔁 Callback page listening on http://{}{}", local_addr, CALLBACK_PATH);

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            join,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn callback_url(&self) -> String {
        format!("http://{}{}", self.local_addr, CALLBACK_PATH)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Keep-alive connections can hold a graceful stop open indefinitely.
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.join).await.is_err() {
            self.join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::messages::TWITTER_CALLBACK;

    async fn start(bus: MessageBus) -> CallbackServer {
        CallbackServer::start("127.0.0.1:0".parse().unwrap(), bus, None)
            .await
            .unwrap()
    }

    fn no_redirect_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_callback_relays_to_listening_opener() {
        let bus = MessageBus::default();
        let mut listener = bus.listen();
        let server = start(bus).await;

        let url = format!("{}?oauth_token=tok&oauth_verifier=ver", server.callback_url());
        let resp = no_redirect_client().get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("window.close()"));

        let msg = listener.recv().await.unwrap();
        assert_eq!(msg.origin, format!("http://{}", server.local_addr()));
        assert_eq!(msg.data["type"], TWITTER_CALLBACK);
        assert_eq!(msg.data["oauth_verifier"], "ver");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_stamps_host_it_was_served_from() {
        let bus = MessageBus::default();
        let mut listener = bus.listen();
        let server = start(bus).await;
        let host = format!("localhost:{}", server.local_addr().port());

        let url = format!("{}?oauth_token=tok&oauth_verifier=ver", server.callback_url());
        let resp = no_redirect_client()
            .get(&url)
            .header(reqwest::header::HOST, host.as_str())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        drop(resp);

        let msg = listener.recv().await.unwrap();
        assert_eq!(msg.origin, format!("http://{host}"));
        server.shutdown().await;
    }

    #[test]
    fn test_missing_host_falls_back() {
        assert_eq!(served_origin(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_callback_without_opener_redirects_home() {
        let server = start(MessageBus::default()).await;

        let url = format!("{}?oauth_token=tok&oauth_verifier=ver", server.callback_url());
        let resp = no_redirect_client().get(&url).send().await.unwrap();
        assert!(resp.status().is_redirection());
        assert_eq!(resp.headers()["location"], "/");
        drop(resp);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_missing_params_waits() {
        let bus = MessageBus::default();
        let _listener = bus.listen();
        let server = start(bus).await;

        let url = format!("{}?oauth_token=tok", server.callback_url());
        let resp = no_redirect_client().get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("Connecting to Twitter"));
        server.shutdown().await;
    }
}
