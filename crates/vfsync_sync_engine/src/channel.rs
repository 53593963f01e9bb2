//! Session channels carrying backend requests.
//!
//! A channel moves one [`BackendRequest`] to a backend and brings back its
//! [`BackendResponse`]. Three carriers are provided: a direct in-process
//! call, a dedicated worker thread, and a TCP connection speaking
//! length-prefixed CBOR frames.

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use vfsync_protocol::{
    decode_frame_len, encode_frame, from_cbor, to_cbor, BackendRequest, BackendResponse,
    RequestFrame, ResponseFrame, FRAME_HEADER_LEN,
};

/// Something that answers backend requests in-process.
pub type RequestHandlerFn = Arc<dyn Fn(BackendRequest) -> BackendResponse + Send + Sync>;

/// A request/response carrier to one backend session.
pub trait SessionChannel: Send + Sync {
    /// Sends `request` and waits for its response.
    fn call(&self, request: BackendRequest) -> SyncResult<BackendResponse>;

    /// Releases the channel. Later calls fail with [`SyncError::NotConnected`].
    fn close(&self);
}

/// Calls the handler directly on the caller's thread.
pub struct LoopbackChannel {
    handler: RequestHandlerFn,
    open: AtomicBool,
    available: Arc<AtomicBool>,
}

impl LoopbackChannel {
    /// Wraps a handler.
    pub fn new(handler: RequestHandlerFn) -> Self {
        Self {
            handler,
            open: AtomicBool::new(true),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shares an availability switch; while it is off every call fails with
    /// a retryable transport error.
    pub fn with_availability(mut self, available: Arc<AtomicBool>) -> Self {
        self.available = available;
        self
    }
}

impl SessionChannel for LoopbackChannel {
    fn call(&self, request: BackendRequest) -> SyncResult<BackendResponse> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("backend unavailable"));
        }
        Ok((self.handler)(request))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

type Envelope = (RequestFrame, mpsc::Sender<ResponseFrame>);

/// Runs the handler on a dedicated worker thread.
pub struct ThreadChannel {
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ThreadChannel {
    /// Spawns the worker.
    pub fn spawn(handler: RequestHandlerFn, config: &RemoteConfig) -> SyncResult<Self> {
        let (sender, receiver) = mpsc::channel::<Envelope>();
        let worker = std::thread::Builder::new()
            .name("vfsync-session".to_string())
            .spawn(move || {
                while let Ok((frame, reply)) = receiver.recv() {
                    let body = handler(frame.body);
                    let _ = reply.send(ResponseFrame {
                        request_id: frame.request_id,
                        body,
                    });
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(1),
            timeout: config.request_timeout,
        })
    }
}

impl SessionChannel for ThreadChannel {
    fn call(&self, request: BackendRequest) -> SyncResult<BackendResponse> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = mpsc::channel();
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(SyncError::NotConnected)?;
            sender
                .send((RequestFrame { request_id, body: request }, reply))
                .map_err(|_| SyncError::transport_retryable("session worker stopped"))?;
        }
        let frame = response.recv_timeout(self.timeout).map_err(|err| match err {
            mpsc::RecvTimeoutError::Timeout => SyncError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => {
                SyncError::transport_retryable("session worker dropped the request")
            }
        })?;
        if frame.request_id != request_id {
            return Err(SyncError::Protocol(format!(
                "response {} does not match request {request_id}",
                frame.request_id
            )));
        }
        Ok(frame.body)
    }

    fn close(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::warn!("session worker panicked");
            }
        }
    }
}

impl Drop for ThreadChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Speaks length-prefixed CBOR frames over a TCP connection.
pub struct TcpChannel {
    stream: Mutex<Option<TcpStream>>,
    next_id: AtomicU64,
    max_frame_size: usize,
}

impl TcpChannel {
    /// Connects to `addr` with the configured timeout applied to connect,
    /// reads and writes.
    pub fn connect(addr: impl ToSocketAddrs, config: &RemoteConfig) -> SyncResult<Self> {
        let mut last = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, config.request_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.request_timeout))?;
                    stream.set_write_timeout(Some(config.request_timeout))?;
                    stream.set_nodelay(true)?;
                    tracing::debug!(addr = %candidate, "tcp session connected");
                    return Ok(Self {
                        stream: Mutex::new(Some(stream)),
                        next_id: AtomicU64::new(1),
                        max_frame_size: config.max_frame_size,
                    });
                }
                Err(err) => last = Some(err),
            }
        }
        Err(last.map_or_else(
            || SyncError::transport_fatal("address resolved to nothing"),
            SyncError::from,
        ))
    }

    fn exchange(&self, stream: &mut TcpStream, frame: &RequestFrame) -> SyncResult<ResponseFrame> {
        let payload = to_cbor(frame)?;
        stream.write_all(&encode_frame(&payload))?;
        stream.flush()?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        stream.read_exact(&mut header)?;
        let len = decode_frame_len(header, self.max_frame_size)?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;
        Ok(from_cbor(&body)?)
    }
}

impl SessionChannel for TcpChannel {
    fn call(&self, request: BackendRequest) -> SyncResult<BackendResponse> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(SyncError::NotConnected)?;
        let frame = RequestFrame { request_id, body: request };
        match self.exchange(stream, &frame) {
            Ok(response) if response.request_id == request_id => Ok(response.body),
            Ok(response) => {
                guard.take();
                Err(SyncError::Protocol(format!(
                    "response {} does not match request {request_id}",
                    response.request_id
                )))
            }
            Err(err) => {
                // A half-read frame leaves the stream unusable.
                guard.take();
                Err(err)
            }
        }
    }

    fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> RequestHandlerFn {
        Arc::new(|request: BackendRequest| match request {
            BackendRequest::Ping => BackendResponse::Pong,
            other => BackendResponse::Error {
                message: other.name().to_string(),
            },
        })
    }

    #[test]
    fn loopback_respects_availability_and_close() {
        let available = Arc::new(AtomicBool::new(true));
        let channel = LoopbackChannel::new(echo_handler()).with_availability(Arc::clone(&available));
        assert_eq!(channel.call(BackendRequest::Ping).unwrap(), BackendResponse::Pong);

        available.store(false, Ordering::SeqCst);
        let err = channel.call(BackendRequest::Ping).unwrap_err();
        assert!(err.is_retryable());

        available.store(true, Ordering::SeqCst);
        channel.close();
        assert!(matches!(channel.call(BackendRequest::Ping), Err(SyncError::NotConnected)));
    }

    #[test]
    fn thread_channel_round_trip() {
        let channel = ThreadChannel::spawn(echo_handler(), &RemoteConfig::default()).unwrap();
        assert_eq!(channel.call(BackendRequest::Ping).unwrap(), BackendResponse::Pong);
        let response = channel
            .call(BackendRequest::Goodbye {
                session: "s".into(),
            })
            .unwrap();
        assert_eq!(
            response,
            BackendResponse::Error {
                message: "goodbye".into()
            }
        );
        channel.close();
        assert!(matches!(channel.call(BackendRequest::Ping), Err(SyncError::NotConnected)));
    }

    #[test]
    fn thread_channel_times_out() {
        let slow: RequestHandlerFn = Arc::new(|_: BackendRequest| {
            std::thread::sleep(Duration::from_millis(200));
            BackendResponse::Pong
        });
        let config = RemoteConfig::new().with_request_timeout(Duration::from_millis(10));
        let channel = ThreadChannel::spawn(slow, &config).unwrap();
        assert!(matches!(channel.call(BackendRequest::Ping), Err(SyncError::Timeout)));
    }

    #[test]
    fn tcp_connect_refused_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = RemoteConfig::new().with_request_timeout(Duration::from_millis(200));
        match TcpChannel::connect(addr, &config) {
            Err(err) => assert!(err.is_retryable()),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
