//! Local endpoint discovery for the presence service.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Full-duplex byte stream to one presence service endpoint.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedIpcStream = Box<dyn IpcStream>;

/// Opens the numbered local endpoints the presence service listens on.
#[async_trait]
pub trait IpcConnector: Send + Sync {
    async fn open(&self, index: u8) -> io::Result<BoxedIpcStream>;
}

const ENDPOINT_PREFIX: &str = "discord-ipc-";

/// Location of endpoint `index` on this platform.
#[cfg(unix)]
pub fn endpoint_path(index: u8) -> PathBuf {
    let base = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|name| std::env::var_os(name))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join(format!("{ENDPOINT_PREFIX}{index}"))
}

#[cfg(windows)]
pub fn endpoint_path(index: u8) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{ENDPOINT_PREFIX}{index}"))
}

/// Connector for the service running on this machine.
#[derive(Debug, Default, Clone)]
pub struct LocalIpcConnector;

impl LocalIpcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IpcConnector for LocalIpcConnector {
    #[cfg(unix)]
    async fn open(&self, index: u8) -> io::Result<BoxedIpcStream> {
        let stream = tokio::net::UnixStream::connect(endpoint_path(index)).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    async fn open(&self, index: u8) -> io::Result<BoxedIpcStream> {
        let client = tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint_path(index))?;
        Ok(Box::new(client))
    }
}
