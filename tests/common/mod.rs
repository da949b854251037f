#![allow(dead_code)]

use axum::Router;
use std::num::NonZeroU32;
use storesync::pacer::RequestPacer;
use tokio::net::TcpListener;

/// Serve the router built by `build` on an ephemeral local port and return
/// its base URL. `build` receives that URL so handlers can emit absolute
/// links back to the server.
pub async fn spawn_server<F>(build: F) -> String
where
    F: FnOnce(String) -> Router,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let base = format!(
        "http://{}",
        listener.local_addr().expect("listener has no local addr")
    );
    let app = build(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    base
}

/// A pacer fast enough not to slow tests down.
pub fn fast_pacer() -> RequestPacer {
    RequestPacer::per_second(NonZeroU32::new(1000).expect("non-zero"))
}
