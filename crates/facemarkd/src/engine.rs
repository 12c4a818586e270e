use facemark_core::{
    analyze, load_upload, Analysis, ConfigurationError, ModelRegistry, PipelineError,
    SessionStore, UploadToken,
};
use serde::Serialize;
use std::num::NonZeroUsize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::Config;

/// Identity of one client session. Each session owns its own upload cache.
pub type SessionId = Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an upload: what is now cached for the session.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub token: String,
    pub width: u32,
    pub height: u32,
    /// Unfiltered detector rows held for re-thresholding.
    pub candidates: usize,
    /// True when the token was already cached and nothing was re-run.
    pub cached: bool,
}

/// Engine state reported by `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub backend: String,
    pub detector_loaded: bool,
    pub landmarker_loaded: bool,
    pub sessions: usize,
    pub max_sessions: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Open {
        session: SessionId,
    },
    Upload {
        session: SessionId,
        token: UploadToken,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<UploadSummary, EngineError>>,
    },
    Analyze {
        session: SessionId,
        threshold: f32,
        reply: oneshot::Sender<Result<Analysis, EngineError>>,
    },
    Close {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Register a new, empty session.
    pub async fn open(&self, session: SessionId) -> Result<(), EngineError> {
        self.tx
            .send(EngineRequest::Open { session })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Decode and detect `image` unless `token` is already cached for `session`.
    pub async fn upload(
        &self,
        session: SessionId,
        token: UploadToken,
        image: Vec<u8>,
    ) -> Result<UploadSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Upload {
                session,
                token,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Re-filter the session's cached upload at `threshold`.
    pub async fn analyze(&self, session: SessionId, threshold: f32) -> Result<Analysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                session,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Drop a session's cache. Returns whether it existed.
    pub async fn close(&self, session: SessionId) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Close {
                session,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Models and per-session caches, owned by the engine thread.
struct Engine {
    registry: ModelRegistry,
    sessions: SessionStore<SessionId>,
    max_detections: usize,
    max_image_dim: u32,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Open { session } => {
                self.sessions.session(session);
                tracing::debug!(%session, live = self.sessions.len(), "session opened");
            }
            EngineRequest::Upload {
                session,
                token,
                image,
                reply,
            } => {
                let result = self.upload(session, &token, &image);
                if let Err(err) = &result {
                    tracing::warn!(%session, %token, error = %err, "upload failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Analyze {
                session,
                threshold,
                reply,
            } => {
                let _ = reply.send(self.analyze(session, threshold));
            }
            EngineRequest::Close { session, reply } => {
                let existed = self.sessions.remove(&session);
                tracing::debug!(%session, existed, "session closed");
                let _ = reply.send(existed);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn upload(
        &mut self,
        session: SessionId,
        token: &UploadToken,
        image: &[u8],
    ) -> Result<UploadSummary, EngineError> {
        let max_dim = self.max_image_dim;
        let cache = self
            .sessions
            .get(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        let cached = cache.is_current(token);
        let upload = cache.get_or_refresh(token, || load_upload(image, max_dim), &mut self.registry)?;

        tracing::info!(
            %session,
            %token,
            cached,
            width = upload.image().width(),
            height = upload.image().height(),
            candidates = upload.detections().len(),
            "upload ready"
        );

        Ok(UploadSummary {
            token: token.to_string(),
            width: upload.image().width(),
            height: upload.image().height(),
            candidates: upload.detections().len(),
            cached,
        })
    }

    fn analyze(&mut self, session: SessionId, threshold: f32) -> Result<Analysis, EngineError> {
        let cache = self
            .sessions
            .get(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        let upload = cache.current().ok_or(PipelineError::NoUpload)?;
        let analysis = analyze(
            upload.image(),
            upload.detections(),
            threshold,
            self.max_detections,
            &mut self.registry,
        )?;

        tracing::info!(
            %session,
            threshold,
            faces = analysis.face_count(),
            crowded = analysis.crowded,
            "analysis served"
        );
        Ok(analysis)
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            backend: self.registry.backend().to_string(),
            detector_loaded: self.registry.detector_loaded(),
            landmarker_loaded: self.registry.landmarker_loaded(),
            sessions: self.sessions.len(),
            max_sessions: self.sessions.capacity(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Resolves the backend and loads both ONNX models before returning, so a bad
/// backend name or a missing model fails startup instead of the first request.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let mut registry = ModelRegistry::new(&config.model_config())?;
    registry.preload()?;
    tracing::info!(
        backend = %registry.backend(),
        detector = %registry.detector_path(),
        landmarks = %registry.landmark_path(),
        "models loaded"
    );

    let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
    let mut engine = Engine {
        registry,
        sessions: SessionStore::new(capacity),
        max_detections: config.max_detections,
        max_image_dim: config.max_image_dim,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facemark-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_spawn_rejects_unknown_backend() {
        let config = Config {
            backend: "xyz".into(),
            model_dir: PathBuf::from("/nonexistent/models"),
            ..Config::default()
        };
        let result = spawn_engine(&config);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_spawn_fails_without_models() {
        let config = Config {
            model_dir: PathBuf::from("/nonexistent/models"),
            ..Config::default()
        };
        let result = spawn_engine(&config);
        assert!(matches!(
            result,
            Err(EngineError::Pipeline(PipelineError::Detector(_)))
        ));
    }

    fn offline_engine() -> Engine {
        let config = Config {
            model_dir: PathBuf::from("/nonexistent/models"),
            ..Config::default()
        };
        Engine {
            registry: ModelRegistry::new(&config.model_config()).unwrap(),
            sessions: SessionStore::new(NonZeroUsize::new(2).unwrap()),
            max_detections: config.max_detections,
            max_image_dim: config.max_image_dim,
        }
    }

    #[test]
    fn test_analyze_unknown_session() {
        let mut engine = offline_engine();
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.analyze(id, 0.5),
            Err(EngineError::UnknownSession(s)) if s == id
        ));
    }

    #[test]
    fn test_analyze_before_upload() {
        let mut engine = offline_engine();
        let id = Uuid::new_v4();
        engine.handle(EngineRequest::Open { session: id });
        assert!(matches!(
            engine.analyze(id, 0.5),
            Err(EngineError::Pipeline(PipelineError::NoUpload))
        ));
    }

    #[test]
    fn test_bad_upload_is_decode_error() {
        let mut engine = offline_engine();
        let id = Uuid::new_v4();
        engine.handle(EngineRequest::Open { session: id });
        let result = engine.upload(id, &UploadToken::from("t1"), b"not an image");
        assert!(matches!(
            result,
            Err(EngineError::Pipeline(PipelineError::Decode(_)))
        ));
        assert!(engine.sessions.get(&id).unwrap().current().is_none());
    }

    #[test]
    fn test_upload_to_unopened_session_is_rejected() {
        let mut engine = offline_engine();
        let open = Uuid::new_v4();
        engine.handle(EngineRequest::Open { session: open });

        // Capacity is 2: two stray ids must not push the open session out.
        for _ in 0..2 {
            let stray = Uuid::new_v4();
            let result = engine.upload(stray, &UploadToken::from("t1"), b"junk");
            assert!(matches!(result, Err(EngineError::UnknownSession(s)) if s == stray));
        }
        assert_eq!(engine.sessions.len(), 1);
        assert!(matches!(
            engine.analyze(open, 0.5),
            Err(EngineError::Pipeline(PipelineError::NoUpload))
        ));
    }

    #[test]
    fn test_status_counts_sessions() {
        let mut engine = offline_engine();
        engine.handle(EngineRequest::Open { session: Uuid::new_v4() });
        engine.handle(EngineRequest::Open { session: Uuid::new_v4() });
        engine.handle(EngineRequest::Open { session: Uuid::new_v4() });
        let status = engine.status();
        assert_eq!(status.sessions, 2);
        assert_eq!(status.max_sessions, 2);
        assert_eq!(status.backend, "caffe");
        assert!(!status.detector_loaded);
    }
}
