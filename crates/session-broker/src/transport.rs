//! Raw CDP command transport over a remote websocket endpoint.
//!
//! The pipeline never launches a local browser: sessions are provisioned by
//! an external vendor and reached through their websocket url. The transport
//! multiplexes commands and events over that single connection and keeps the
//! remote session alive with a periodic version ping.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use inboxshot_core_types::PipelineError;

/// Event forwarded from the browser before any higher-level interpretation.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is addressed: the browser endpoint itself or an attached
/// page session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PipelineError>;

    async fn next_event(&self) -> Option<TransportEvent>;

    fn is_alive(&self) -> bool;
}

/// Transport that refuses every command; stands in where no browser is wired.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, PipelineError> {
        Err(PipelineError::session(format!(
            "transport not available for method {method}"
        )))
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    fn is_alive(&self) -> bool {
        false
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, PipelineError>>,
}

/// Live connection to a remote browser session.
pub struct RemoteTransport {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    command_deadline: Duration,
    loop_task: JoinHandle<()>,
    keepalive_task: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
}

impl RemoteTransport {
    /// Connect to the vendor-provided websocket url. `keepalive` of zero
    /// disables the ping task.
    pub async fn connect(
        ws_url: &str,
        command_deadline: Duration,
        keepalive: Duration,
    ) -> Result<Self, PipelineError> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| PipelineError::session(format!("cdp connect failed: {err}")))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            if let Err(err) = run_loop(conn, command_rx, events_tx).await {
                error!(target: "session-broker", ?err, "transport loop terminated with error");
            }
            loop_alive.store(false, Ordering::Relaxed);
        });

        let keepalive_task =
            spawn_keepalive(command_tx.clone(), alive.clone(), keepalive, command_deadline);

        info!(target: "session-broker", url = %ws_url, "remote browser connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            command_deadline,
            loop_task,
            keepalive_task,
            alive,
        })
    }
}

#[async_trait]
impl CdpTransport for RemoteTransport {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PipelineError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| PipelineError::session(format!("transport channel closed: {err}")))?;

        match tokio::time::timeout(self.command_deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PipelineError::session("command response channel closed")),
            Err(_) => Err(PipelineError::session(format!("{method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

impl Drop for RemoteTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.keepalive_task {
            handle.abort();
        }
    }
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), PipelineError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, PipelineError>>> =
        HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                submit(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        let entry = inflight.remove(&resp.id);
                        let result = extract_payload(resp);
                        if let Some(sender) = entry {
                            let _ = sender.send(result);
                        }
                    }
                    Some(Ok(Message::Event(event))) => {
                        forward_event(event, &event_tx).await;
                    }
                    Some(Err(err)) => {
                        let mapped = PipelineError::session(format!("cdp i/o: {err}"));
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(mapped.clone()));
                        }
                        return Err(mapped);
                    }
                    None => {
                        let closed = PipelineError::session("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(closed.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, PipelineError>>>,
) -> Result<(), PipelineError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let mapped = PipelineError::session(format!("submit failed: {err}"));
            let _ = cmd.responder.send(Err(mapped.clone()));
            Err(mapped)
        }
    }
}

async fn forward_event(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
    let raw: CdpJsonEventMessage = match event.try_into() {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "session-broker", ?err, "failed to decode cdp event");
            return;
        }
    };

    let payload = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };

    if event_tx.send(payload).await.is_err() {
        debug!(target: "session-broker", "event receiver dropped");
    }
}

fn extract_payload(resp: Response) -> Result<Value, PipelineError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        Err(PipelineError::session(format!(
            "cdp error {}: {}",
            error.code, error.message
        )))
    } else {
        Err(PipelineError::internal("empty cdp response"))
    }
}

fn spawn_keepalive(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            if !alive.load(Ordering::Relaxed) {
                break;
            }

            let (resp_tx, resp_rx) = oneshot::channel();
            let ping = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: Value::Object(Default::default()),
                responder: resp_tx,
            };

            if sender.send(ping).await.is_err() {
                debug!(target: "session-broker", "keepalive send failed (channel closed)");
                break;
            }

            match tokio::time::timeout(deadline, resp_rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "session-broker", ?err, "keepalive command error");
                    break;
                }
                Ok(Err(_)) | Err(_) => {
                    warn!(target: "session-broker", "keepalive timed out");
                    break;
                }
            }
        }
    }))
}
