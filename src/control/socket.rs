//! Unix socket transport for the control protocol
//!
//! A client writes commands (one per line) and shuts down its write half; the
//! server applies them and answers with the status listing before closing.
//! Requests larger than 64 KiB are cut back to their last complete line, and a
//! client that never finishes its request is dropped after the request timeout.
//!
//! ```text
//! printf 'merge 111\nadd_axis 111 0\n' | socat - UNIX-CONNECT:/run/user/1000/unijoy.sock
//! ```

use super::ControlProtocol;
use crate::error::ControlError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest request accepted from one connection
const MAX_REQUEST: u64 = 64 * 1024;

pub struct ControlServer {
    path: PathBuf,
    listener: UnixListener,
    protocol: ControlProtocol,
    request_timeout: Duration,
}

impl ControlServer {
    /// Binds the socket, replacing a stale socket file
    pub async fn bind(
        path: &Path,
        protocol: ControlProtocol,
        request_timeout: Duration,
    ) -> Result<Self, ControlError> {
        if path.exists() {
            debug!("Removing stale control socket {}", path.display());
            tokio::fs::remove_file(path)
                .await
                .map_err(|source| ControlError::Bind {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        let listener = UnixListener::bind(path).map_err(|source| ControlError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Control socket listening on {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            listener,
            protocol,
            request_timeout,
        })
    }

    /// Accepts connections until `shutdown` fires, then removes the socket file
    pub async fn run_until_shutdown(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Control socket shutting down");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let protocol = self.protocol.clone();
                            let timeout = self.request_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, protocol, timeout).await {
                                    warn!("{}", e);
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept control connection: {}", e),
                    }
                }
            }
        }

        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run_until_shutdown(shutdown))
    }
}

/// Applies every line of the request, then writes back the status listing
pub async fn handle_connection(
    mut stream: UnixStream,
    protocol: ControlProtocol,
    request_timeout: Duration,
) -> Result<(), ControlError> {
    let mut request = Vec::new();
    let mut limited = (&mut stream).take(MAX_REQUEST + 1);
    let read = limited.read_to_end(&mut request);
    tokio::time::timeout(request_timeout, read)
        .await
        .map_err(|_| ControlError::Timeout(request_timeout))??;

    if request.len() as u64 > MAX_REQUEST {
        request.truncate(MAX_REQUEST as usize);
        let complete = request
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |newline| newline + 1);
        debug!(
            "Request exceeds {} bytes, ignoring {} bytes of its last line",
            MAX_REQUEST,
            request.len() - complete
        );
        request.truncate(complete);
    }

    for line in request
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
    {
        protocol.store(line);
    }

    stream.write_all(protocol.show().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::host::InputHandler;
    use crate::source::tests::{stick, NullConnection};
    use crate::source::{Fingerprint, SourceState};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn state(engine: &Engine, id: u64) -> Option<SourceState> {
        engine
            .status()
            .sources
            .iter()
            .find(|source| source.id == Fingerprint(id))
            .map(|source| source.state)
    }

    #[tokio::test]
    async fn commands_in_status_out() {
        let (producer, _consumer) = crate::output::bounded(16);
        let engine = Arc::new(Engine::new(Default::default(), producer));
        engine.connect(&stick(111, 4, 19), Box::new(NullConnection));

        let (mut client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(handle_connection(
            server,
            ControlProtocol::new(engine.clone()),
            TIMEOUT,
        ));

        client
            .write_all(b"merge 111\nadd_axis 111 0 2\n\nbogus\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(reply.contains("111\tMERGED"));
        assert!(reply.contains("AXS #  2 ->   0 of 111 ONLINE"));
        assert_eq!(engine.total(crate::mapping::ChannelKind::Axis), 3);
    }

    #[tokio::test]
    async fn oversized_request_drops_its_cut_line() {
        let (producer, _consumer) = crate::output::bounded(16);
        let engine = Arc::new(Engine::new(Default::default(), producer));
        engine.connect(&stick(7, 2, 2), Box::new(NullConnection));
        engine.connect(&stick(12, 2, 2), Box::new(NullConnection));

        // the cap falls inside "1234", leaving "merge 12"
        let mut request = b"merge 7\n".to_vec();
        request.resize(MAX_REQUEST as usize - 8, b'\n');
        request.extend_from_slice(b"merge 1234\n");

        let (mut client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(handle_connection(
            server,
            ControlProtocol::new(engine.clone()),
            TIMEOUT,
        ));
        client.write_all(&request).await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(state(&engine, 7), Some(SourceState::Merged));
        assert_eq!(state(&engine, 12), Some(SourceState::Online));
        assert!(reply.contains("12\tONLINE"));
    }

    #[tokio::test]
    async fn unfinished_request_times_out_unapplied() {
        let (producer, _consumer) = crate::output::bounded(16);
        let engine = Arc::new(Engine::new(Default::default(), producer));
        engine.connect(&stick(111, 4, 19), Box::new(NullConnection));

        let (mut client, server) = UnixStream::pair().unwrap();
        client.write_all(b"merge 111\n").await.unwrap();

        let result = handle_connection(
            server,
            ControlProtocol::new(engine.clone()),
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(result, Err(ControlError::Timeout(_))));
        assert_eq!(state(&engine, 111), Some(SourceState::Online));
        drop(client);
    }
}
