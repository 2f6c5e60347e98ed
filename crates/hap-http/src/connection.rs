//! TCP connection to a HomeKit accessory.
//!
//! A connection starts in plain HTTP mode, which is enough for pair-setup,
//! pair-verify and identify. `upgrade` switches it to the encrypted session:
//! the socket is split, requests are sealed on the caller's task and a
//! background reader opens frames, answers waiting requests in FIFO order
//! and forwards `EVENT/1.0` bodies as notifications.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hap_core::error::{Error as CoreError, HttpError, Result};
use hap_core::{CharacteristicValue, Characteristics};
use hap_crypto::chacha::{FrameOpener, FrameSealer};
use hap_crypto::keys::SessionKeys;
use hap_pairing::PairingTransport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc::UnboundedSender, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::traits::TransportNotification;
use crate::{HttpRequest, HttpResponse};

const READ_CHUNK: usize = 4096;

type PendingQueue = Arc<Mutex<VecDeque<oneshot::Sender<HttpResponse>>>>;

enum Mode {
    Plain { stream: TcpStream, buffer: Vec<u8> },
    Encrypted(EncryptedChannel),
    Closed,
}

struct EncryptedChannel {
    writer: OwnedWriteHalf,
    sealer: FrameSealer,
    pending: PendingQueue,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    notifications: UnboundedSender<TransportNotification>,
}

impl Drop for EncryptedChannel {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
    }
}

/// HTTP connection to one accessory.
pub struct HapConnection {
    addr: SocketAddr,
    request_timeout: Duration,
    mode: Mode,
}

impl HapConnection {
    /// Open a plain connection.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CoreError::Timeout)?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => HttpError::ConnectionRefused.into(),
                _ => CoreError::Connection(e),
            })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected");

        Ok(Self {
            addr,
            request_timeout,
            mode: Mode::Plain {
                stream,
                buffer: Vec::new(),
            },
        })
    }

    /// Get the remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.mode, Mode::Encrypted(_))
    }

    /// False once closed locally or after the session reader stopped.
    pub fn is_open(&self) -> bool {
        match &self.mode {
            Mode::Plain { .. } => true,
            Mode::Encrypted(channel) => {
                !channel.closing.load(Ordering::SeqCst) && !channel.reader.is_finished()
            }
            Mode::Closed => false,
        }
    }

    /// Send request and receive response.
    pub async fn send(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let data = request.serialize(&self.addr.to_string());
        debug!(
            method = request.method.as_str(),
            uri = %request.uri,
            encrypted = self.is_encrypted(),
            body_len = request.body.as_ref().map(|b| b.len()).unwrap_or(0),
            "HTTP ->"
        );

        let result = match &mut self.mode {
            Mode::Plain { stream, buffer } => {
                stream.write_all(&data).await?;
                stream.flush().await?;
                timeout(self.request_timeout, read_plain_response(stream, buffer))
                    .await
                    .map_err(|_| CoreError::Timeout)
                    .and_then(|r| r)
            }
            Mode::Encrypted(channel) => {
                let (tx, rx) = oneshot::channel();
                channel.pending.lock().await.push_back(tx);
                if channel.closing.load(Ordering::SeqCst) {
                    return Err(HttpError::ConnectionClosed.into());
                }
                let wire = channel.sealer.seal(&data)?;
                channel.writer.write_all(&wire).await?;
                match timeout(self.request_timeout, rx).await {
                    Err(_) => Err(CoreError::Timeout),
                    Ok(Err(_)) => Err(HttpError::ConnectionClosed.into()),
                    Ok(Ok(response)) => Ok(response),
                }
            }
            Mode::Closed => Err(HttpError::ConnectionClosed.into()),
        };

        match result {
            Ok(response) => {
                debug!(status = response.status_code, body_len = response.body.len(), "HTTP <-");
                Ok(response)
            }
            Err(CoreError::Timeout) => {
                // A late answer would be matched to the next request
                warn!(addr = %self.addr, "request timed out, dropping connection");
                self.abandon().await;
                Err(CoreError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Switch to the encrypted session derived by pair-verify.
    ///
    /// Events and the eventual drop of the session are reported on
    /// `notifications`.
    pub fn upgrade(
        &mut self,
        keys: &SessionKeys,
        notifications: UnboundedSender<TransportNotification>,
    ) -> Result<()> {
        let (stream, buffer) = match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Plain { stream, buffer } => (stream, buffer),
            other => {
                self.mode = other;
                return Err(HttpError::InvalidResponse(
                    "session already encrypted or closed".to_string(),
                )
                .into());
            }
        };
        if !buffer.is_empty() {
            return Err(HttpError::InvalidResponse(format!(
                "{} unread plaintext bytes before upgrade",
                buffer.len()
            ))
            .into());
        }

        let (read_half, writer) = stream.into_split();
        let (sealer, opener) = keys.cipher().split();
        let pending: PendingQueue = Arc::new(Mutex::new(VecDeque::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            read_half,
            opener,
            pending.clone(),
            closing.clone(),
            notifications.clone(),
        ));

        self.mode = Mode::Encrypted(EncryptedChannel {
            writer,
            sealer,
            pending,
            closing,
            reader,
            notifications,
        });
        debug!(addr = %self.addr, "session encrypted");
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Plain { mut stream, .. } => {
                let _ = stream.shutdown().await;
            }
            Mode::Encrypted(mut channel) => {
                channel.closing.store(true, Ordering::SeqCst);
                let _ = channel.writer.shutdown().await;
            }
            Mode::Closed => {}
        }
        Ok(())
    }

    /// Drop the connection after a failure. An encrypted session reports
    /// the loss as `Disconnected` so subscribers can recover.
    async fn abandon(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Plain { mut stream, .. } => {
                let _ = stream.shutdown().await;
            }
            Mode::Encrypted(mut channel) => {
                channel.closing.store(true, Ordering::SeqCst);
                channel.reader.abort();
                let _ = channel.writer.shutdown().await;
                let _ = channel.notifications.send(TransportNotification::Disconnected);
            }
            Mode::Closed => {}
        }
    }

    async fn exchange(&mut self, request: HttpRequest) -> Result<Vec<u8>> {
        let response = self.send(request).await?;
        response.ensure_success()?;
        Ok(response.body)
    }
}

#[async_trait]
impl PairingTransport for HapConnection {
    async fn pair_setup(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.exchange(HttpRequest::pair_setup(request.to_vec())).await
    }

    async fn pair_verify(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.exchange(HttpRequest::pair_verify(request.to_vec())).await
    }

    async fn pairings(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.exchange(HttpRequest::pairings(request.to_vec())).await
    }
}

async fn read_plain_response(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<HttpResponse> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some((response, used)) = HttpResponse::try_parse(buffer)? {
            buffer.drain(..used);
            return Ok(response);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::ConnectionClosed.into());
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut opener: FrameOpener,
    pending: PendingQueue,
    closing: Arc<AtomicBool>,
    notifications: UnboundedSender<TransportNotification>,
) {
    let result = pump_frames(&mut reader, &mut opener, &pending, &notifications).await;
    let closed_locally = closing.swap(true, Ordering::SeqCst);

    // Dropping the senders fails every waiting request
    pending.lock().await.clear();

    if closed_locally {
        debug!("session closed locally");
        return;
    }
    match result {
        Ok(()) => debug!("accessory closed the session"),
        Err(e) => warn!(error = %e, "session read failed"),
    }
    let _ = notifications.send(TransportNotification::Disconnected);
}

async fn pump_frames(
    reader: &mut OwnedReadHalf,
    opener: &mut FrameOpener,
    pending: &PendingQueue,
    notifications: &UnboundedSender<TransportNotification>,
) -> Result<()> {
    let mut sealed = Vec::new();
    let mut plain = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sealed.extend_from_slice(&chunk[..n]);

        while let Some((block, used)) = opener.open_frame(&sealed)? {
            sealed.drain(..used);
            plain.extend_from_slice(&block);
        }

        while let Some((message, used)) = HttpResponse::try_parse(&plain)? {
            plain.drain(..used);
            route(message, pending, notifications).await;
        }
    }
}

async fn route(
    message: HttpResponse,
    pending: &PendingQueue,
    notifications: &UnboundedSender<TransportNotification>,
) {
    if message.is_event() {
        match message.json::<Characteristics<CharacteristicValue>>() {
            Ok(body) => {
                trace!(count = body.characteristics.len(), "EVENT <-");
                let _ = notifications.send(TransportNotification::Event(body.characteristics));
            }
            Err(e) => warn!(error = %e, "undecodable event body"),
        }
        return;
    }

    match pending.lock().await.pop_front() {
        Some(waiter) => {
            // The requester may have timed out
            let _ = waiter.send(message);
        }
        None => warn!(status = message.status_code, "unsolicited response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpMethod;
    use hap_crypto::keys::SharedSecret;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Read one plaintext request head plus body from a raw socket.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            data.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map(|v| v.parse::<usize>().unwrap())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return text;
                }
            }
        }
    }

    fn session_keys() -> SessionKeys {
        SessionKeys::derive_control_keys(&SharedSecret::new(vec![7u8; 32])).unwrap()
    }

    mod connection_lifecycle {
        use super::*;

        #[tokio::test]
        async fn connect_fails_on_refused() {
            let (listener, addr) = listener().await;
            drop(listener);
            let result = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn close_is_idempotent() {
            let (_listener, addr) = listener().await;
            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            assert!(conn.is_open());

            conn.close().await.unwrap();
            conn.close().await.unwrap();
            assert!(!conn.is_open());
        }

        #[tokio::test]
        async fn send_after_close_fails() {
            let (_listener, addr) = listener().await;
            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            conn.close().await.unwrap();

            let result = conn.send(HttpRequest::identify()).await;
            assert!(matches!(result, Err(CoreError::Http(HttpError::ConnectionClosed))));
        }

        #[tokio::test]
        async fn addr_returns_remote_address() {
            let (_listener, addr) = listener().await;
            let conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            assert_eq!(conn.addr(), addr);
            assert_eq!(conn.addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
    }

    mod plain_mode {
        use super::*;

        #[tokio::test]
        async fn sends_request_and_reads_response() {
            let (listener, addr) = listener().await;
            let server = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                stream
                    .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                    .await
                    .unwrap();
                request
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let response = conn.send(HttpRequest::identify()).await.unwrap();
            assert_eq!(response.status_code, 204);

            let request = server.await.unwrap();
            assert!(request.starts_with("POST /identify HTTP/1.1\r\n"));
        }

        #[tokio::test]
        async fn response_split_across_writes() {
            let (listener, addr) = listener().await;
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_request(&mut stream).await;
                stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Le").await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                stream.write_all(b"ngth: 3\r\n\r\nabc").await.unwrap();
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let response = conn
                .send(HttpRequest::new(HttpMethod::Get, "/accessories"))
                .await
                .unwrap();
            assert_eq!(response.body, b"abc");
        }

        #[tokio::test]
        async fn pairing_exchange_rejects_error_status() {
            let (listener, addr) = listener().await;
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_request(&mut stream).await;
                stream
                    .write_all(b"HTTP/1.1 470 Connection Authorization Required\r\n\r\n")
                    .await
                    .unwrap();
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let result = PairingTransport::pairings(&mut conn, &[0x06, 0x01, 0x01]).await;
            assert!(matches!(result, Err(CoreError::Http(HttpError::UnexpectedStatus(470)))));
        }

        #[tokio::test]
        async fn timeout_closes_connection() {
            let (listener, addr) = listener().await;
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                read_request(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, Duration::from_millis(50))
                .await
                .unwrap();
            let result = conn.send(HttpRequest::identify()).await;
            assert!(matches!(result, Err(CoreError::Timeout)));
            assert!(!conn.is_open());
        }
    }

    mod encrypted_mode {
        use super::*;

        /// Accessory side of an encrypted session.
        async fn serve_encrypted(
            mut stream: TcpStream,
            keys: SessionKeys,
            event_first: bool,
        ) -> Vec<String> {
            let (mut sealer, mut opener) = keys.reversed().cipher().split();
            let mut sealed = Vec::new();
            let mut plain = Vec::new();
            let mut seen = Vec::new();
            let mut chunk = [0u8; 1024];

            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return seen;
                }
                sealed.extend_from_slice(&chunk[..n]);
                while let Some((block, used)) = opener.open_frame(&sealed).unwrap() {
                    sealed.drain(..used);
                    plain.extend_from_slice(&block);
                }
                let text = String::from_utf8_lossy(&plain).to_string();
                if !text.contains("\r\n\r\n") {
                    continue;
                }
                plain.clear();
                seen.push(text);

                let mut out = Vec::new();
                if event_first {
                    let body = br#"{"characteristics":[{"aid":1,"iid":12,"value":1}]}"#;
                    out.extend_from_slice(
                        format!("EVENT/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
                            .as_bytes(),
                    );
                    out.extend_from_slice(body);
                }
                out.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}");
                stream.write_all(&sealer.seal(&out).unwrap()).await.unwrap();
            }
        }

        #[tokio::test]
        async fn routes_responses_and_events() {
            let (listener, addr) = listener().await;
            let keys = session_keys();
            let server_keys = keys.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve_encrypted(stream, server_keys, true).await
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            conn.upgrade(&keys, tx).unwrap();
            assert!(conn.is_encrypted());

            let response = conn.send(HttpRequest::get_accessories()).await.unwrap();
            assert_eq!(response.body, b"{}");

            match rx.recv().await {
                Some(TransportNotification::Event(values)) => {
                    assert_eq!(values[0].iid, 12);
                    assert_eq!(values[0].value, Some(serde_json::json!(1)));
                }
                other => panic!("expected event, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn remote_close_reports_disconnect() {
            let (listener, addr) = listener().await;
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                drop(stream);
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            conn.upgrade(&session_keys(), tx).unwrap();

            assert_eq!(rx.recv().await, Some(TransportNotification::Disconnected));
            assert!(!conn.is_open());
            assert!(matches!(
                conn.send(HttpRequest::get_accessories()).await,
                Err(CoreError::Http(HttpError::ConnectionClosed))
            ));
        }

        #[tokio::test]
        async fn local_close_is_silent() {
            let (listener, addr) = listener().await;
            let keys = session_keys();
            let server_keys = keys.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve_encrypted(stream, server_keys, false).await
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            conn.upgrade(&keys, tx).unwrap();
            conn.close().await.unwrap();
            drop(conn);

            // Every sender is gone once the reader stops, without a Disconnected
            assert_eq!(rx.recv().await, None);
        }

        #[tokio::test]
        async fn timeout_reports_disconnect() {
            let (listener, addr) = listener().await;
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(stream);
            });

            let mut conn = HapConnection::connect(addr, TIMEOUT, Duration::from_millis(50))
                .await
                .unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            conn.upgrade(&session_keys(), tx).unwrap();

            let result = conn.send(HttpRequest::get_accessories()).await;
            assert!(matches!(result, Err(CoreError::Timeout)));
            assert!(!conn.is_open());
            assert_eq!(rx.recv().await, Some(TransportNotification::Disconnected));
        }

        #[tokio::test]
        async fn upgrade_twice_fails() {
            let (_listener, addr) = listener().await;
            let mut conn = HapConnection::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
            let (tx, _rx) = mpsc::unbounded_channel();
            conn.upgrade(&session_keys(), tx.clone()).unwrap();
            assert!(conn.upgrade(&session_keys(), tx).is_err());
            assert!(conn.is_encrypted());
        }
    }
}
