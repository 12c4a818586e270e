use facemark_core::{PipelineError, UploadToken};
use uuid::Uuid;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};

/// Well-known bus name and interface of the detection daemon.
pub const BUS_NAME: &str = "org.facemark.Facemark1";
/// Object path the service is served at.
pub const OBJECT_PATH: &str = "/org/facemark/Facemark1";

/// D-Bus interface for the facemark detection daemon.
///
/// Bus name: org.facemark.Facemark1
/// Object path: /org/facemark/Facemark1
pub struct FacemarkService {
    engine: EngineHandle,
}

impl FacemarkService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.facemark.Facemark1")]
impl FacemarkService {
    /// Start a client session and return its id.
    async fn open_session(&self) -> zbus::fdo::Result<String> {
        let session = Uuid::new_v4();
        self.engine.open(session).await.map_err(to_fdo)?;
        tracing::info!(%session, "session opened");
        Ok(session.to_string())
    }

    /// Drop a client session and its cached upload.
    async fn close_session(&self, session: &str) -> zbus::fdo::Result<bool> {
        let session = parse_session(session)?;
        self.engine.close(session).await.map_err(to_fdo)
    }

    /// Upload an encoded image under `token`. Detection runs only when the
    /// token differs from the session's current upload.
    async fn upload(&self, session: &str, token: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let session = parse_session(session)?;
        tracing::info!(%session, token, bytes = image.len(), "upload requested");
        let summary = self
            .engine
            .upload(session, UploadToken::new(token), image)
            .await
            .map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Filter the session's current upload at `threshold` and return the
    /// analysis as JSON.
    async fn analyze(&self, session: &str, threshold: f64) -> zbus::fdo::Result<String> {
        let session = parse_session(session)?;
        let analysis = self
            .engine
            .analyze(session, threshold as f32)
            .await
            .map_err(to_fdo)?;
        to_json(&analysis)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": status.backend,
            "models_loaded": status.detector_loaded && status.landmarker_loaded,
            "sessions": status.sessions,
            "max_sessions": status.max_sessions,
        })
        .to_string())
    }
}

fn parse_session(session: &str) -> zbus::fdo::Result<Uuid> {
    Uuid::parse_str(session)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid session id {session:?}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Caller mistakes become `InvalidArgs`; model and engine failures `Failed`.
fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match &err {
        EngineError::UnknownSession(_)
        | EngineError::Pipeline(PipelineError::Decode(_))
        | EngineError::Pipeline(PipelineError::InvalidThreshold(_))
        | EngineError::Pipeline(PipelineError::NoUpload) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
