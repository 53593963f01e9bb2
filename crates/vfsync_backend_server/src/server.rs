//! TCP front end for the backend.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::BackendHandler;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use vfsync_protocol::{
    decode_frame_len, encode_frame, from_cbor, to_cbor, BackendRequest, BackendResponse,
    RequestFrame, ResponseFrame, FRAME_HEADER_LEN,
};

/// The backend server.
///
/// Clients speak length-prefixed CBOR [`RequestFrame`]s and receive one
/// [`ResponseFrame`] per request, in order. The first request on a
/// connection must be `Hello`; anything else is answered with an error.
/// Requests run on the blocking pool since they touch the disk and may
/// spawn processes.
///
/// # Example
///
/// ```no_run
/// use vfsync_backend_server::{BackendServer, ServerConfig};
///
/// # async fn run() -> vfsync_backend_server::ServerResult<()> {
/// let server = BackendServer::bind(ServerConfig::new("/srv/project")).await?;
/// println!("listening on {}", server.local_addr()?);
/// server.serve().await
/// # }
/// ```
pub struct BackendServer {
    listener: TcpListener,
    handler: Arc<BackendHandler>,
    permits: Arc<Semaphore>,
}

impl BackendServer {
    /// Opens the workspace and binds the listener.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let handler = Arc::new(BackendHandler::new(config)?);
        Ok(Self {
            listener,
            handler,
            permits,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared request handler.
    pub fn handler(&self) -> Arc<BackendHandler> {
        Arc::clone(&self.handler)
    }

    /// Accepts connections until the task is dropped.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> ServerResult<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "backend server listening");
        tokio::pin!(shutdown);
        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&self.permits).acquire_owned() => permit
                    .map_err(|_| ServerError::Internal("connection limiter closed".into()))?,
            };
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };
            let handler = Arc::clone(&self.handler);
            let max_frame = handler.config().max_frame_size;
            tokio::spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer, "connection accepted");
                match serve_connection(stream, handler, max_frame).await {
                    Ok(()) => tracing::debug!(%peer, "connection closed"),
                    Err(err) => tracing::warn!(%peer, error = %err, "connection failed"),
                }
            });
        }
        tracing::info!("backend server stopped");
        Ok(())
    }
}

async fn read_frame(stream: &mut TcpStream, max_frame: usize) -> ServerResult<Option<RequestFrame>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = decode_frame_len(header, max_frame)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(from_cbor(&payload)?))
}

async fn write_frame(stream: &mut TcpStream, frame: &ResponseFrame) -> ServerResult<()> {
    let payload = to_cbor(frame)?;
    stream.write_all(&encode_frame(&payload)).await?;
    stream.flush().await?;
    Ok(())
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<BackendHandler>,
    max_frame: usize,
) -> ServerResult<()> {
    let mut session: Option<String> = None;
    let result = loop {
        let frame = match read_frame(&mut stream, max_frame).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        let request_id = frame.request_id;
        let request = frame.body;

        let opens_session = matches!(request, BackendRequest::Hello { .. });
        let body = if session.is_none() && !opens_session {
            BackendResponse::Error {
                message: ServerError::NoSession.to_string(),
            }
        } else {
            let opened = match &request {
                BackendRequest::Hello { session, .. } => Some(session.clone()),
                _ => None,
            };
            let goodbye = matches!(request, BackendRequest::Goodbye { .. });
            let worker = Arc::clone(&handler);
            let body = match tokio::task::spawn_blocking(move || worker.handle(request)).await {
                Ok(body) => body,
                Err(err) => break Err(ServerError::Internal(format!("handler panicked: {err}"))),
            };
            if !matches!(body, BackendResponse::Error { .. }) && opened.is_some() {
                session = opened;
            }
            if goodbye {
                if let Some(closed) = session.take() {
                    handler.end_session(&closed);
                }
            }
            body
        };

        if let Err(err) = write_frame(&mut stream, &ResponseFrame { request_id, body }).await {
            break Err(err);
        }
    };
    if let Some(session) = session {
        handler.end_session(&session);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vfsync_protocol::{FileContent, PROTOCOL_VERSION};

    async fn start() -> (TempDir, SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path()).with_bind_addr(([127, 0, 0, 1], 0).into());
        let server = BackendServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.serve_until(async move {
            let _ = stopped.await;
        }));
        (dir, addr, stop)
    }

    async fn call(stream: &mut TcpStream, request_id: u64, body: BackendRequest) -> ResponseFrame {
        let payload = to_cbor(&RequestFrame { request_id, body }).unwrap();
        stream.write_all(&encode_frame(&payload)).await.unwrap();
        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let len = decode_frame_len(header, usize::MAX).unwrap();
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        from_cbor(&payload).unwrap()
    }

    #[tokio::test]
    async fn requests_before_hello_are_refused() {
        let (_dir, addr, _stop) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let response = call(&mut stream, 1, BackendRequest::Ping).await;
        assert_eq!(response.request_id, 1);
        assert!(matches!(response.body, BackendResponse::Error { .. }));
    }

    #[tokio::test]
    async fn full_session_flow() {
        let (dir, addr, stop) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let hello = BackendRequest::Hello {
            session: "tcp".into(),
            version: PROTOCOL_VERSION,
        };
        assert_eq!(call(&mut stream, 1, hello).await.body, BackendResponse::Done);
        assert_eq!(call(&mut stream, 2, BackendRequest::Ping).await.body, BackendResponse::Pong);

        let write = BackendRequest::WriteFile {
            path: "/notes/a.md".into(),
            content: FileContent::from("# A"),
        };
        let response = call(&mut stream, 3, write).await;
        assert_eq!(response.request_id, 3);
        assert!(matches!(response.body, BackendResponse::Written(ref o) if o.is_applied()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes/a.md")).unwrap(),
            "# A"
        );

        assert_eq!(
            call(
                &mut stream,
                4,
                BackendRequest::Goodbye {
                    session: "tcp".into()
                }
            )
            .await
            .body,
            BackendResponse::Done
        );
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn oversized_frames_drop_the_connection() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path())
            .with_bind_addr(([127, 0, 0, 1], 0).into())
            .with_max_frame_size(16);
        let server = BackendServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&encode_frame(&[0u8; 64])).await.unwrap();
        let mut buf = [0u8; 1];
        let read = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(read, 0);
    }
}
