//! JSON-lines control endpoint.
//!
//! One TCP connection per peer; every inbound line is one frame, every
//! frame gets one reply line. Control verbs go to the agent. Two envelopes
//! exist only on the socket: `PUSH` delivers a push payload, and `HELLO`
//! registers the connection as a client surface, after which agent-to-client
//! messages stream back over the same connection until it drops.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sidecache_core::{Agent, ClientId, ControlMessage, ControlReply};

/// Frames only the socket understands; everything else is a control verb.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum SocketFrame {
    /// A push payload, forwarded verbatim to the notification dispatcher.
    Push { payload: serde_json::Value },
    /// Register this connection as a client surface showing `url`.
    Hello { url: String },
}

/// State a `HELLO` leaves behind on a connection.
struct Registration {
    id: ClientId,
    forwarder: JoinHandle<()>,
}

pub async fn run(agent: Arc<Agent>) -> Result<()> {
    let addr = agent.config().control_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Control endpoint listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "Control connection opened");
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(agent, stream).await {
                debug!(%peer, error = %e, "Control connection ended with error");
            }
        });
    }
}

async fn serve_connection(agent: Arc<Agent>, stream: TcpStream) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Replies and forwarded client messages share the write half through
    // one channel so their lines never interleave.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move { write_lines(write_half, &mut out_rx).await });

    let mut registration: Option<Registration> = None;
    let outcome = read_frames(&agent, &mut lines, &out_tx, &mut registration).await;

    // Runs on clean close and on read errors alike; a leaked registration
    // would keep counting as a live surface after the peer is gone.
    if let Some(registration) = registration.take() {
        agent.hub().disconnect(registration.id);
        registration.forwarder.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    outcome
}

async fn read_frames(
    agent: &Arc<Agent>,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    out_tx: &UnboundedSender<String>,
    registration: &mut Option<Registration>,
) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_line(agent, line, out_tx, registration).await;
        if out_tx.send(serde_json::to_string(&reply)?).is_err() {
            break;
        }
    }
    Ok(())
}

async fn write_lines(
    mut write_half: OwnedWriteHalf,
    out_rx: &mut mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = out_rx.recv().await {
        if write_half.write_all(line.as_bytes()).await.is_err()
            || write_half.write_all(b"\n").await.is_err()
        {
            break;
        }
    }
}

async fn handle_line(
    agent: &Arc<Agent>,
    line: &str,
    out_tx: &UnboundedSender<String>,
    registration: &mut Option<Registration>,
) -> ControlReply {
    match serde_json::from_str::<SocketFrame>(line) {
        Ok(SocketFrame::Push { payload }) => {
            agent.handle_push(payload.to_string().as_bytes());
            ControlReply::Ack
        }
        Ok(SocketFrame::Hello { url }) => {
            register_surface(agent, &url, out_tx, registration);
            ControlReply::Ack
        }
        Err(_) => match ControlMessage::parse(line.as_bytes()) {
            Some(message) => agent.handle_control(message).await,
            None => ControlReply::Error {
                message: "malformed control frame".to_string(),
            },
        },
    }
}

fn register_surface(
    agent: &Arc<Agent>,
    url: &str,
    out_tx: &UnboundedSender<String>,
    registration: &mut Option<Registration>,
) {
    // A repeated HELLO moves the surface instead of duplicating it.
    if let Some(registration) = registration {
        agent.hub().update_location(registration.id, url);
        return;
    }

    let (id, mut messages) = agent.hub().connect(url);
    let out_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => {
                    if out_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Could not encode client message"),
            }
        }
    });
    *registration = Some(Registration { id, forwarder });
}

// ============================================================================
// Tests
// ============================================================================
