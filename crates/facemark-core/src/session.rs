//! Per-upload caching of decoded images and raw detector output.
//!
//! Inference runs once per upload token. Threshold changes re-filter the
//! cached rows in [`crate::pipeline::analyze`] without touching the models.

use crate::detector::Detector;
use crate::image_io::{DecodeError, Image};
use crate::pipeline::PipelineError;
use crate::types::{RawDetection, UploadToken};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// One decoded upload and the full, unfiltered detector output for it.
#[derive(Debug, Clone)]
pub struct UploadSession {
    token: UploadToken,
    image: Image,
    detections: Vec<RawDetection>,
}

impl UploadSession {
    pub fn token(&self) -> &UploadToken {
        &self.token
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Every candidate the detector produced, in detector order.
    pub fn detections(&self) -> &[RawDetection] {
        &self.detections
    }
}

/// Holds at most one [`UploadSession`] for one client session.
#[derive(Debug, Default)]
pub struct SessionCache {
    current: Option<UploadSession>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached upload, if any.
    pub fn current(&self) -> Option<&UploadSession> {
        self.current.as_ref()
    }

    /// Whether `token` is the upload currently held.
    pub fn is_current(&self, token: &UploadToken) -> bool {
        self.current.as_ref().is_some_and(|s| &s.token == token)
    }

    /// Return the cached upload for `token`, or load and detect a new one.
    ///
    /// On a token change `loader` runs once and `detector` runs once; the
    /// result replaces the previous entry wholesale. On a matching token
    /// neither is called. If loading or detection fails the previous entry is
    /// kept as it was.
    pub fn get_or_refresh<F, D>(
        &mut self,
        token: &UploadToken,
        loader: F,
        detector: &mut D,
    ) -> Result<&UploadSession, PipelineError>
    where
        F: FnOnce() -> Result<Image, DecodeError>,
        D: Detector + ?Sized,
    {
        if !self.is_current(token) {
            let image = loader()?;
            let detections = detector.detect(&image)?;
            tracing::debug!(
                token = %token,
                width = image.width(),
                height = image.height(),
                candidates = detections.len(),
                "upload session refreshed"
            );
            self.current = Some(UploadSession {
                token: token.clone(),
                image,
                detections,
            });
        }

        self.current.as_ref().ok_or(PipelineError::NoUpload)
    }
}

/// Independent [`SessionCache`]s keyed by client session, least recently
/// used evicted first once `capacity` sessions are live.
pub struct SessionStore<K: Hash + Eq> {
    sessions: LruCache<K, SessionCache>,
}

impl<K: Hash + Eq> SessionStore<K> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            sessions: LruCache::new(capacity),
        }
    }

    /// The cache for `key`, created empty on first access.
    pub fn session(&mut self, key: K) -> &mut SessionCache {
        self.sessions.get_or_insert_mut(key, SessionCache::new)
    }

    /// The cache for `key` if it already exists.
    pub fn get(&mut self, key: &K) -> Option<&mut SessionCache> {
        self.sessions.get_mut(key)
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&mut self, key: &K) -> bool {
        self.sessions.pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.sessions.cap().get()
    }
}
