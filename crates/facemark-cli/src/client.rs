//! Thin D-Bus client for facemarkd.

use anyhow::{Context, Result};

#[zbus::proxy(
    interface = "org.facemark.Facemark1",
    default_service = "org.facemark.Facemark1",
    default_path = "/org/facemark/Facemark1"
)]
pub trait Facemark {
    fn open_session(&self) -> zbus::Result<String>;
    fn close_session(&self, session: &str) -> zbus::Result<bool>;
    fn upload(&self, session: &str, token: &str, image: &[u8]) -> zbus::Result<String>;
    fn analyze(&self, session: &str, threshold: f64) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon on the session bus.
pub async fn connect() -> Result<FacemarkProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    FacemarkProxy::new(&connection)
        .await
        .context("facemarkd is not reachable")
}
