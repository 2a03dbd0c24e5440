//! Named-pipe connect.

use tokio::time::Instant;

use crate::error::{Provider, SniErrorCode, TransportError};
use crate::stream::StreamHandle;

/// Open `\\server\pipe\<pipe>`, retrying while every pipe instance is busy.
#[cfg(windows)]
pub(crate) async fn connect_pipe(
    server: &str,
    pipe: &str,
    deadline: Option<Instant>,
) -> Result<StreamHandle, TransportError> {
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;

    use crate::stream::{Probe, RawStream};

    const ERROR_PIPE_BUSY: i32 = 231;
    const BUSY_RETRY: Duration = Duration::from_millis(50);

    let path = format!(r"\\{server}\pipe\{pipe}");
    tracing::debug!(path = %path, "opening named pipe");

    let client = loop {
        match ClientOptions::new().open(&path) {
            Ok(client) => break client,
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
            Err(e) => {
                return Err(TransportError::io_with_code(
                    Provider::Np,
                    SniErrorCode::ConnOpenFailed,
                    e,
                ));
            }
        }
        if deadline.is_some_and(|d| Instant::now() + BUSY_RETRY >= d) {
            return Err(TransportError::new(
                Provider::Np,
                SniErrorCode::ConnOpenFailed,
                format!("timed out waiting for {path}"),
            ));
        }
        tokio::time::sleep(BUSY_RETRY).await;
    };

    Ok(StreamHandle::new(
        Provider::Np,
        server.to_string(),
        RawStream::Pipe(client),
        Probe::Pipe,
    ))
}

/// Named pipes need the Windows pipe client.
#[cfg(not(windows))]
pub(crate) async fn connect_pipe(
    server: &str,
    pipe: &str,
    _deadline: Option<Instant>,
) -> Result<StreamHandle, TransportError> {
    Err(TransportError::new(
        Provider::Np,
        SniErrorCode::ProtocolNotSupported,
        format!(r"named pipe \\{server}\pipe\{pipe} requires Windows"),
    ))
}
