//! `hostbridge serve` — Stdio host adapter.
//!
//! One JSON object per line in each direction.
//!
//! In (stdin):
//! - `{"type":"call","id":…,"method":…,"params":…}` — a control call
//! - `{"type":"push","correlationId":…,"outcome":{…}}` — a tool or inference outcome
//! - `{"type":"poll"}` — drain queued events now
//!
//! Out (stdout):
//! - `{"type":"reply","id":…,"reply":{"ok":…}}` — the reply to a call, in completion order
//! - `{"type":"events","events":[…]}` — queued events, also flushed periodically
//! - `{"type":"error","message":…}` — a frame that could not be handled

use std::sync::Arc;

use hostbridge_config::AppConfig;
use hostbridge_core::event::BridgeEvent;
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use hostbridge_gateway::{ControlCall, ControlReply, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Call {
        #[serde(default)]
        id: Value,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Push {
        #[serde(rename = "correlationId")]
        correlation_id: CorrelationId,
        outcome: ToolOutcome,
    },
    Poll,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outbound {
    Reply { id: Value, reply: ControlReply },
    Events { events: Vec<BridgeEvent> },
    Error { message: String },
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;
    let flush_every = config.bridge.event_flush_interval();

    let transport = Arc::new(Transport::start(config)?);
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(write_frames(out_rx));
    let flusher = tokio::spawn(flush_events(Arc::clone(&transport), out_tx.clone(), flush_every));

    info!("Serving native host on stdio");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        handle_line(&transport, &line, &out_tx);
    }

    info!("Host closed stdin; shutting down");
    flusher.abort();
    if transport.runtime().is_initialized() {
        let _ = transport.runtime().shutdown();
    }
    // Pending call handles resolve once the call lane stops
    drop(transport);
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

fn handle_line(transport: &Transport, line: &str, out: &mpsc::UnboundedSender<Outbound>) {
    let frame: Inbound = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Unreadable frame");
            let _ = out.send(Outbound::Error {
                message: format!("unreadable frame: {e}"),
            });
            return;
        }
    };

    match frame {
        Inbound::Call { id, method, params } => {
            debug!(method = %method, "Control call");
            let handle = transport.send_call(ControlCall::new(method, params));
            let out = out.clone();
            tokio::spawn(async move {
                let reply = handle.await;
                let _ = out.send(Outbound::Reply { id, reply });
            });
        }
        Inbound::Push {
            correlation_id,
            outcome,
        } => {
            if let Err(e) = transport.push_response(correlation_id, outcome) {
                let _ = out.send(Outbound::Error {
                    message: e.to_string(),
                });
            }
        }
        Inbound::Poll => match transport.poll_events() {
            Ok(events) => {
                let _ = out.send(Outbound::Events { events });
            }
            Err(e) => {
                let _ = out.send(Outbound::Error {
                    message: e.to_string(),
                });
            }
        },
    }
}

/// Push queued events to the host at a fixed cadence.
async fn flush_events(
    transport: Arc<Transport>,
    out: mpsc::UnboundedSender<Outbound>,
    every: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        // Uninitialized: nothing to flush yet
        let Ok(events) = transport.poll_events() else {
            continue;
        };
        if !events.is_empty() && out.send(Outbound::Events { events }).is_err() {
            break;
        }
    }
}

async fn write_frames(mut frames: mpsc::UnboundedReceiver<Outbound>) {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = frames.recv().await {
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Cannot encode frame");
                continue;
            }
        };
        line.push('\n');
        if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            warn!("Host closed stdout");
            break;
        }
    }
}
