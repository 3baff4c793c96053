//! Server-Sent Events transport over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use fleetlive_protocol::DEFAULT_MAX_MESSAGE_SIZE;

use crate::error::TransportError;
use crate::transport::sse_parser::SseParser;
use crate::transport::{Connection, ConnectionSink, Transport, TransportEvent};
use crate::types::LiveConfig;

/// Buffered events per connection before the reader waits for the manager.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Header carrying the resume point on reconnect.
const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Default silence before a stream is given up, matching
/// [`LiveConfig`].
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Streams events from an SSE endpoint.
///
/// Each [`connect`](Transport::connect) issues one `GET` and reads the body
/// until it ends, fails, or the connection is closed locally. The last seen
/// event id is remembered and sent back on the next connect.
///
/// A stream that stays silent for the idle timeout, heartbeats included, is
/// reported as an error so the manager reconnects. The same deadline bounds
/// the wait for response headers.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    idle_timeout: Duration,
    max_message_bytes: usize,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Uses a preconfigured client (proxies, TLS roots, auth headers).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_SIZE,
            last_event_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Takes the idle timeout and message limit from a manager config.
    pub fn with_config(self, config: &LiveConfig) -> Self {
        self.with_idle_timeout(config.idle_timeout())
            .with_max_message_bytes(config.max_message_bytes)
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Frames larger than this are dropped while parsing.
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Id of the last event received on any connection from this transport.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().ok().and_then(|id| id.clone())
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = self.last_event_id() {
            request = request.header(LAST_EVENT_ID, id);
        }
        request
    }
}

impl Transport for SseTransport {
    fn connect(&self) -> Connection {
        let (sink, connection) = Connection::channel(EVENT_CHANNEL_CAPACITY);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(url = %self.url, "opening SSE stream");
                runtime.spawn(stream_events(
                    self.request(),
                    StreamLimits {
                        idle_timeout: self.idle_timeout,
                        max_message_bytes: self.max_message_bytes,
                    },
                    sink,
                    self.last_event_id.clone(),
                ));
            }
            Err(_) => {
                let _ = sink.try_send(TransportEvent::Error(TransportError::Other(
                    "no Tokio runtime to drive the SSE stream".into(),
                )));
            }
        }
        connection
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamLimits {
    idle_timeout: Duration,
    max_message_bytes: usize,
}

/// Runs one SSE connection until it ends or the client side closes it.
async fn stream_events(
    request: reqwest::RequestBuilder,
    limits: StreamLimits,
    sink: ConnectionSink,
    last_event_id: Arc<Mutex<Option<String>>>,
) {
    tokio::select! {
        _ = sink.closed() => debug!("SSE stream closed locally"),
        () = read_stream(request, limits, &sink, &last_event_id) => {}
    }
}

async fn read_stream(
    request: reqwest::RequestBuilder,
    limits: StreamLimits,
    sink: &ConnectionSink,
    last_event_id: &Mutex<Option<String>>,
) {
    let response = match tokio::time::timeout(limits.idle_timeout, request.send()).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => {
            sink.send(TransportEvent::Error(e.into())).await;
            return;
        }
        Err(_) => {
            warn!(
                timeout_ms = limits.idle_timeout.as_millis() as u64,
                "no response headers from SSE endpoint"
            );
            sink.send(TransportEvent::Error(TransportError::Other(
                "timed out waiting for response headers".into(),
            )))
            .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(%status, "SSE endpoint refused stream");
        sink.send(TransportEvent::Error(TransportError::Status(status)))
            .await;
        return;
    }

    if !sink.send(TransportEvent::Open).await {
        return;
    }

    let mut parser = SseParser::new(limits.max_message_bytes);
    let mut body = response.bytes_stream();

    // Any inbound bytes, comments included, push the deadline out.
    let idle = tokio::time::sleep(limits.idle_timeout);
    tokio::pin!(idle);

    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            () = &mut idle => {
                warn!(
                    timeout_ms = limits.idle_timeout.as_millis() as u64,
                    "SSE stream idle, giving up"
                );
                sink.send(TransportEvent::Error(TransportError::Other("stream idle".into())))
                    .await;
                return;
            }
        };
        let Some(chunk) = chunk else { break };
        idle.as_mut().reset(Instant::now() + limits.idle_timeout);

        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                sink.send(TransportEvent::Error(e.into())).await;
                return;
            }
        };

        for frame in parser.feed(&bytes) {
            trace!(event = ?frame.event, len = frame.data.len(), "SSE frame");
            if !sink.send(TransportEvent::Message(frame.data)).await {
                return;
            }
        }

        if let Some(id) = parser.last_event_id() {
            if let Ok(mut last) = last_event_id.lock() {
                *last = Some(id.to_string());
            }
        }
    }

    debug!("SSE stream ended");
    sink.send(TransportEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads an HTTP request head and returns it as text.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await.unwrap();
            if n == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serves one canned response per accepted connection and reports
    /// each request head.
    async fn serve(responses: Vec<String>) -> (String, tokio::sync::mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/events", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let head = read_request(&mut stream).await;
                let _ = tx.send(head).await;
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        (url, rx)
    }

    fn sse_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
        )
    }

    /// Accepts one connection and writes each step after its delay, then
    /// keeps the socket open without sending anything.
    async fn serve_then_hold(steps: Vec<(Duration, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/events", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            for (delay, bytes) in steps {
                tokio::time::sleep(delay).await;
                stream.write_all(bytes.as_bytes()).await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });
        url
    }

    async fn next(conn: &mut Connection) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), conn.next_event())
            .await
            .expect("event in time")
            .expect("stream still open")
    }

    #[tokio::test]
    async fn streams_open_messages_and_close() {
        let body = ": hello\n\ndata: {\"type\":\"update_available\"}\n\ndata: {\"type\":\"status_changed\"}\n\n";
        let (url, mut heads) = serve(vec![sse_response(body)]).await;
        let transport = SseTransport::new(url);
        let mut conn = transport.connect();

        assert!(matches!(next(&mut conn).await, TransportEvent::Open));
        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Message(m) if m == r#"{"type":"update_available"}"#
        ));
        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Message(m) if m == r#"{"type":"status_changed"}"#
        ));
        assert!(matches!(next(&mut conn).await, TransportEvent::Closed));

        let head = heads.recv().await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /api/events"));
        assert!(head.contains("accept: text/event-stream"));
        assert!(!head.contains("last-event-id"));
    }

    #[tokio::test]
    async fn error_status_is_transport_error() {
        let refused =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string();
        let (url, _heads) = serve(vec![refused]).await;
        let mut conn = SseTransport::new(url).connect();

        match next(&mut conn).await {
            TransportEvent::Error(TransportError::Status(s)) => assert_eq!(s.as_u16(), 503),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut conn = SseTransport::new(format!("http://{addr}/events")).connect();
        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Error(TransportError::Http(_))
        ));
    }

    #[tokio::test]
    async fn resends_last_event_id() {
        let (url, mut heads) = serve(vec![
            sse_response("id: 7\ndata: {\"type\":\"a\"}\n\n"),
            sse_response(""),
        ])
        .await;
        let transport = SseTransport::new(url);

        let mut first = transport.connect();
        while !matches!(next(&mut first).await, TransportEvent::Closed) {}
        assert_eq!(transport.last_event_id().as_deref(), Some("7"));
        let _ = heads.recv().await;

        let mut second = transport.connect();
        assert!(matches!(next(&mut second).await, TransportEvent::Open));
        let head = heads.recv().await.unwrap().to_ascii_lowercase();
        assert!(head.contains("last-event-id: 7"));
    }

    #[test]
    fn connect_outside_runtime_reports_error() {
        let mut conn = SseTransport::new("http://127.0.0.1:1/events").connect();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let event = rt.block_on(conn.next_event());
        assert!(matches!(
            event,
            Some(TransportEvent::Error(TransportError::Other(_)))
        ));
    }

    #[tokio::test]
    async fn silent_stream_after_headers_is_reported_idle() {
        let url = serve_then_hold(vec![(Duration::ZERO, sse_response(""))]).await;
        let mut conn = SseTransport::new(url)
            .with_idle_timeout(Duration::from_millis(200))
            .connect();

        assert!(matches!(next(&mut conn).await, TransportEvent::Open));
        match next(&mut conn).await {
            TransportEvent::Error(TransportError::Other(reason)) => {
                assert_eq!(reason, "stream idle")
            }
            other => panic!("expected idle error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_response_headers_time_out() {
        let url = serve_then_hold(Vec::new()).await;
        let mut conn = SseTransport::new(url)
            .with_idle_timeout(Duration::from_millis(200))
            .connect();

        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Error(TransportError::Other(_))
        ));
    }

    #[tokio::test]
    async fn heartbeats_keep_the_stream_alive() {
        let tick = Duration::from_millis(100);
        let mut steps = vec![(Duration::ZERO, sse_response(""))];
        steps.extend((0..5).map(|_| (tick, ": ping\n\n".to_string())));
        steps.push((tick, "data: {\"type\":\"x\"}\n\n".to_string()));
        let url = serve_then_hold(steps).await;

        // The pings span longer than the idle timeout, so only the
        // silence after the last frame may trip it.
        let mut conn = SseTransport::new(url)
            .with_idle_timeout(Duration::from_millis(300))
            .connect();
        assert!(matches!(next(&mut conn).await, TransportEvent::Open));
        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Message(m) if m == r#"{"type":"x"}"#
        ));
        assert!(matches!(
            next(&mut conn).await,
            TransportEvent::Error(TransportError::Other(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_skipped() {
        let body = format!("data: {}\n\ndata: ok\n\n", "x".repeat(64));
        let (url, _heads) = serve(vec![sse_response(&body)]).await;
        let config = LiveConfig {
            max_message_bytes: 16,
            ..LiveConfig::default()
        };
        let mut conn = SseTransport::new(url).with_config(&config).connect();

        assert!(matches!(next(&mut conn).await, TransportEvent::Open));
        assert!(matches!(next(&mut conn).await, TransportEvent::Message(m) if m == "ok"));
        assert!(matches!(next(&mut conn).await, TransportEvent::Closed));
    }
}
