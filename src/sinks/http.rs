//! Minimal HTTP view sink: serves the latest decoded record per inverter as JSON.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

use crate::decoders::{HardwareInfoResponse, StatusResponse};
use crate::poll::{Event, InverterMeta, Sink};

#[derive(Default)]
struct Snapshot {
    status: HashMap<String, StatusResponse>,
    info: HashMap<String, HardwareInfoResponse>,
    last_event: Option<String>,
}

type SharedSnapshot = Arc<RwLock<Snapshot>>;

/// Synchronous sink that updates an in-memory snapshot consumed by a
/// background `axum` server. `store_status`/`store_info` never touch the
/// network; the server handles requests independently.
pub struct HttpViewSink {
    snapshot: SharedSnapshot,
}

impl HttpViewSink {
    /// Bind the view server to `addr` and return the sink that feeds it.
    pub async fn bind(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(Snapshot::default()));

        let app = Router::new()
            .route("/status", get(status_handler))
            .route("/status/:serial", get(status_one_handler))
            .with_state(Arc::clone(&snapshot));

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "http view sink listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "http view server stopped");
            }
        });

        Ok(HttpViewSink { snapshot })
    }
}

impl Sink for HttpViewSink {
    fn store_status(&mut self, status: &StatusResponse, meta: &InverterMeta) {
        let mut snapshot = self.snapshot.write().expect("snapshot lock poisoned");
        snapshot.status.insert(meta.serial.clone(), status.clone());
    }

    fn store_info(&mut self, info: &HardwareInfoResponse, meta: &InverterMeta) {
        let mut snapshot = self.snapshot.write().expect("snapshot lock poisoned");
        snapshot.info.insert(meta.serial.clone(), info.clone());
    }

    fn on_event(&mut self, event: &Event) {
        let mut snapshot = self.snapshot.write().expect("snapshot lock poisoned");
        snapshot.last_event = Some(format!("{event:?}"));
    }
}

async fn status_handler(State(snapshot): State<SharedSnapshot>) -> Json<HashMap<String, StatusResponse>> {
    let snapshot = snapshot.read().expect("snapshot lock poisoned");
    Json(snapshot.status.clone())
}

async fn status_one_handler(
    State(snapshot): State<SharedSnapshot>,
    axum::extract::Path(serial): axum::extract::Path<String>,
) -> Json<Option<StatusResponse>> {
    let snapshot = snapshot.read().expect("snapshot lock poisoned");
    Json(snapshot.status.get(&serial).cloned())
}
