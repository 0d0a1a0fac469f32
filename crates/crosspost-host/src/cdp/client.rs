//! Async WebSocket client for the Chrome DevTools Protocol.
//!
//! [`CdpClient`] owns a background task that holds the browser WebSocket.
//! Callers send commands through a clonable [`CdpHandle`]; responses are
//! routed back by id and events are forwarded on an mpsc channel.
//!
//! ```text
//!  CdpHandle::send() ──cmd──▶ background task ──ws──▶ browser
//!                     ◀─oneshot── tracker ◀──ws── response
//!  event receiver     ◀──evt── Target.* / Page.* events
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crosspost_core::prelude::*;

use super::protocol::{
    parse_cdp_message, CdpClientEvent, CdpError, CdpMessage, CdpRequest, CdpRequestTracker,
    CdpResponse,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Delay before each reconnect attempt; the last entry repeats.
///
/// The DevTools endpoint is local, so it is either back within a few seconds
/// or the browser has exited.
const RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

const MAX_RECONNECT_ATTEMPTS: u32 = 6;

const CMD_CHANNEL_CAPACITY: usize = 32;

const EVENT_CHANNEL_CAPACITY: usize = 256;

const STALE_REQUEST_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Evaluations that await page promises can legitimately take a while.
const STALE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

enum ClientCommand {
    SendRequest {
        method: String,
        params: Option<Value>,
        session_id: Option<String>,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    Disconnect,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// CdpHandle
// ---------------------------------------------------------------------------

/// A clonable handle for sending CDP commands over the shared connection.
#[derive(Clone)]
pub struct CdpHandle {
    cmd_tx: mpsc::Sender<ClientCommand>,
    state: Arc<std::sync::RwLock<ConnectionState>>,
}

impl std::fmt::Debug for CdpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner()).clone();
        f.debug_struct("CdpHandle")
            .field("connection_state", &state)
            .finish()
    }
}

impl CdpHandle {
    /// Send a browser-level command and wait for its result.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_to(method, params, None).await
    }

    /// Send a command to an attached target session.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if the background task has exited or the
    ///   request was dropped during reconnection.
    /// - [`Error::Protocol`] if the browser returned an error object.
    pub async fn send_to(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::SendRequest {
                method: method.to_string(),
                params,
                session_id: session_id.map(str::to_string),
                response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }
}

// ---------------------------------------------------------------------------
// CdpClient
// ---------------------------------------------------------------------------

/// Owns the event receiver for a browser connection.
pub struct CdpClient {
    handle: CdpHandle,
    event_rx: mpsc::Receiver<CdpClientEvent>,
}

impl CdpClient {
    /// Connect to a browser-level DevTools WebSocket endpoint.
    ///
    /// The first connection attempt happens before returning so an
    /// unreachable browser is reported immediately.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(CMD_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<CdpClientEvent>(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(std::sync::RwLock::new(ConnectionState::Connecting));

        info!("Connecting to browser DevTools at {}", ws_url);
        let ws_stream = connect_ws(ws_url).await?;
        {
            let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
            *guard = ConnectionState::Connected;
        }

        tokio::spawn(run_client_task(
            ws_url.to_string(),
            ws_stream,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
        ));

        Ok(Self {
            handle: CdpHandle { cmd_tx, state },
            event_rx,
        })
    }

    pub fn handle(&self) -> CdpHandle {
        self.handle.clone()
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::Receiver<CdpClientEvent> {
        &mut self.event_rx
    }

    /// Split into the command handle and the event stream.
    pub fn into_parts(self) -> (CdpHandle, mpsc::Receiver<CdpClientEvent>) {
        (self.handle, self.event_rx)
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

fn set_state(state: &std::sync::RwLock<ConnectionState>, next: ConnectionState) {
    let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
    *guard = next;
}

async fn run_client_task(
    ws_url: String,
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<CdpClientEvent>,
    state: Arc<std::sync::RwLock<ConnectionState>>,
) {
    let mut tracker = CdpRequestTracker::new();

    let reconnect = run_io_loop(ws_stream, &mut cmd_rx, &event_tx, &mut tracker).await;
    if !reconnect {
        set_state(&state, ConnectionState::Disconnected);
        return;
    }

    let mut attempt: u32 = 1;
    loop {
        // Sessions and in-flight commands belong to the dead socket.
        let dropped = tracker.clear();
        if dropped > 0 {
            debug!("CDP: dropped {} in-flight request(s) after disconnect", dropped);
        }

        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(
                "CDP: exceeded {} reconnection attempts, giving up",
                MAX_RECONNECT_ATTEMPTS
            );
            set_state(&state, ConnectionState::Disconnected);
            let _ = event_tx.try_send(CdpClientEvent::PermanentlyDisconnected);
            break;
        }

        set_state(&state, ConnectionState::Reconnecting { attempt });
        let _ = event_tx.try_send(CdpClientEvent::Reconnecting {
            attempt,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        });

        let delay = reconnect_delay(attempt);
        warn!(
            "CDP: connection lost, retrying in {:?} (attempt {}/{})",
            delay, attempt, MAX_RECONNECT_ATTEMPTS
        );
        tokio::time::sleep(delay).await;

        if cmd_rx.is_closed() {
            set_state(&state, ConnectionState::Disconnected);
            break;
        }

        match connect_ws(&ws_url).await {
            Ok(ws_stream) => {
                info!("CDP: reconnected (attempt {})", attempt);
                set_state(&state, ConnectionState::Connected);
                let _ = event_tx.try_send(CdpClientEvent::Reconnected);
                attempt = 1;

                let reconnect =
                    run_io_loop(ws_stream, &mut cmd_rx, &event_tx, &mut tracker).await;
                if !reconnect {
                    set_state(&state, ConnectionState::Disconnected);
                    break;
                }
            }
            Err(err) => {
                warn!("CDP: reconnection attempt {} failed: {}", attempt, err);
                attempt += 1;
            }
        }
    }

    debug!("CDP background task exiting");
}

/// Drive one connection until it drops (`true`) or the client shuts down
/// (`false`).
async fn run_io_loop(
    ws_stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    event_tx: &mpsc::Sender<CdpClientEvent>,
    tracker: &mut CdpRequestTracker,
) -> bool {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    enable_target_discovery(&mut ws_sink, tracker).await;

    let mut cleanup_interval = tokio::time::interval(STALE_REQUEST_CLEANUP_INTERVAL);
    cleanup_interval.tick().await;

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_ws_text(text.as_str(), tracker, event_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("CDP: received Close frame");
                        return true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("CDP: WebSocket read error: {}", err);
                        return true;
                    }
                    None => {
                        debug!("CDP: WebSocket stream ended");
                        return true;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::SendRequest { method, params, session_id, response_tx }) => {
                        handle_send_request(
                            &method,
                            params,
                            session_id,
                            response_tx,
                            tracker,
                            &mut ws_sink,
                        )
                        .await;
                    }
                    Some(ClientCommand::Disconnect) => {
                        send_close(&mut ws_sink).await;
                        return false;
                    }
                    None => {
                        debug!("CDP: command channel closed, shutting down");
                        send_close(&mut ws_sink).await;
                        return false;
                    }
                }
            }

            _ = cleanup_interval.tick() => {
                let stale = tracker.cleanup_stale(STALE_REQUEST_TIMEOUT);
                if !stale.is_empty() {
                    debug!("CDP: cleaned up {} stale request(s): {:?}", stale.len(), stale);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

async fn connect_ws(ws_url: &str) -> Result<WsStream> {
    let (ws_stream, _response) = connect_async(ws_url)
        .await
        .map_err(|err| Error::host(format!("Failed to connect to browser DevTools: {err}")))?;
    Ok(ws_stream)
}

/// `attempt` is 1-based.
fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt.max(1) as usize - 1).min(RECONNECT_DELAYS.len() - 1);
    RECONNECT_DELAYS[idx]
}

fn handle_ws_text(
    text: &str,
    tracker: &mut CdpRequestTracker,
    event_tx: &mpsc::Sender<CdpClientEvent>,
) {
    match parse_cdp_message(text) {
        CdpMessage::Response(response) => {
            let id = response.id;
            if !tracker.complete(id, response) {
                trace!("CDP: response for unknown request id {}", id);
            }
        }
        CdpMessage::Event(event) => {
            if let Err(err) = event_tx.try_send(CdpClientEvent::Protocol(event)) {
                trace!("CDP: event channel full or closed, dropping event: {}", err);
            }
        }
        CdpMessage::Unknown(raw) => {
            debug!(
                "CDP: ignoring unknown message: {}",
                raw.chars().take(120).collect::<String>()
            );
        }
    }
}

async fn handle_send_request(
    method: &str,
    params: Option<Value>,
    session_id: Option<String>,
    response_tx: oneshot::Sender<Result<Value>>,
    tracker: &mut CdpRequestTracker,
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
) {
    let (id, response_rx) = tracker.register();
    let request = CdpRequest::new(id, method, params, session_id);

    let json = match serde_json::to_string(&request) {
        Ok(j) => j,
        Err(err) => {
            let _ = response_tx.send(Err(Error::protocol(format!(
                "Failed to serialize CDP command: {err}"
            ))));
            return;
        }
    };

    trace!("CDP -> {} (id {})", method, id);
    if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
        let _ = response_tx.send(Err(Error::host(format!(
            "Failed to send CDP command: {err}"
        ))));
        return;
    }

    tokio::spawn(async move {
        match response_rx.await {
            Ok(response) => {
                let _ = response_tx.send(response_to_result(response));
            }
            Err(_) => {
                let _ = response_tx.send(Err(Error::ChannelClosed));
            }
        }
    });
}

fn response_to_result(response: CdpResponse) -> Result<Value> {
    if let Some(error) = response.error {
        Err(cdp_error_to_error(error))
    } else {
        // Some commands (e.g. Page.bringToFront) reply with an empty result.
        Ok(response.result.unwrap_or(Value::Object(Default::default())))
    }
}

fn cdp_error_to_error(err: CdpError) -> Error {
    Error::protocol(format!("CDP error {}: {}", err.code, err.message))
}

async fn send_close(ws_sink: &mut SplitSink<WsStream, WsMessage>) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

/// Subscribe to target lifecycle events on every (re)connection.
async fn enable_target_discovery(
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
    tracker: &mut CdpRequestTracker,
) {
    let (id, _response_rx) = tracker.register();
    let request = CdpRequest::new(
        id,
        "Target.setDiscoverTargets",
        Some(serde_json::json!({ "discover": true })),
        None,
    );
    match serde_json::to_string(&request) {
        Ok(json) => {
            if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
                warn!("CDP: failed to enable target discovery: {}", err);
            }
        }
        Err(err) => warn!("CDP: failed to serialize setDiscoverTargets: {}", err),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_schedule() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(250));
        assert_eq!(reconnect_delay(3), Duration::from_secs(1));
        assert_eq!(reconnect_delay(5), Duration::from_secs(4));
        assert_eq!(reconnect_delay(MAX_RECONNECT_ATTEMPTS), Duration::from_secs(4));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_secs(4));
        assert_eq!(reconnect_delay(0), Duration::from_millis(250));
    }

    #[test]
    fn test_reconnect_gives_up_within_fifteen_seconds() {
        let total: Duration = (1..=MAX_RECONNECT_ATTEMPTS).map(reconnect_delay).sum();
        assert!(total <= Duration::from_secs(15), "{total:?}");
    }

    #[tokio::test]
    async fn test_session_response_routes_to_waiting_command() {
        let mut tracker = CdpRequestTracker::new();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (id, rx) = tracker.register();

        let frame = format!(
            r#"{{"id":{id},"sessionId":"S1","result":{{"result":{{"type":"number","value":3}}}}}}"#
        );
        handle_ws_text(&frame, &mut tracker, &event_tx);

        let response = rx.await.unwrap();
        assert_eq!(response.session_id.as_deref(), Some("S1"));
        assert_eq!(response_to_result(response).unwrap()["result"]["value"], 3);
        assert_eq!(tracker.pending_count(), 0);
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_session_event_is_forwarded_with_its_session() {
        let mut tracker = CdpRequestTracker::new();
        let (event_tx, mut event_rx) = mpsc::channel(4);

        handle_ws_text(
            r#"{"method":"Page.loadEventFired","sessionId":"S2","params":{"timestamp":1.5}}"#,
            &mut tracker,
            &event_tx,
        );

        match event_rx.try_recv() {
            Ok(CdpClientEvent::Protocol(event)) => {
                assert_eq!(event.method, "Page.loadEventFired");
                assert_eq!(event.session_id.as_deref(), Some("S2"));
            }
            other => panic!("expected protocol event, got {other:?}"),
        }
    }

    #[test]
    fn test_full_event_channel_drops_instead_of_blocking() {
        let mut tracker = CdpRequestTracker::new();
        let (event_tx, mut event_rx) = mpsc::channel(1);
        let destroyed = |target: &str| {
            format!(r#"{{"method":"Target.targetDestroyed","params":{{"targetId":"{target}"}}}}"#)
        };

        handle_ws_text(&destroyed("T1"), &mut tracker, &event_tx);
        handle_ws_text(&destroyed("T2"), &mut tracker, &event_tx);

        match event_rx.try_recv() {
            Ok(CdpClientEvent::Protocol(event)) => assert_eq!(event.params["targetId"], "T1"),
            other => panic!("expected first event, got {other:?}"),
        }
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_response_for_unknown_id_is_ignored() {
        let mut tracker = CdpRequestTracker::new();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (_id, _rx) = tracker.register();

        handle_ws_text(r#"{"id":18446744073709551615,"result":{}}"#, &mut tracker, &event_tx);

        assert_eq!(tracker.pending_count(), 1);
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_response_to_result_ok() {
        let resp = CdpResponse {
            id: 1,
            result: Some(serde_json::json!({"targetId": "T"})),
            error: None,
            session_id: None,
        };
        assert_eq!(response_to_result(resp).unwrap()["targetId"], "T");
    }

    #[test]
    fn test_response_to_result_empty_is_object() {
        let resp = CdpResponse {
            id: 1,
            result: None,
            error: None,
            session_id: None,
        };
        assert!(response_to_result(resp).unwrap().is_object());
    }

    #[test]
    fn test_response_to_result_error() {
        let resp = CdpResponse {
            id: 1,
            result: None,
            error: Some(CdpError {
                code: -32000,
                message: "Cannot find context with specified id".to_string(),
                data: None,
            }),
            session_id: None,
        };
        let err = response_to_result(resp).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().contains("-32000"));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_endpoint_fails() {
        let result = CdpClient::connect("ws://127.0.0.1:1/devtools/browser/none").await;
        assert!(matches!(result, Err(Error::Host { .. })));
    }
}
