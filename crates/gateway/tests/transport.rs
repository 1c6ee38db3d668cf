//! Transport tests driven the way a native host drives it: plain threads,
//! blocking waits, and polling for events.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hostbridge_config::AppConfig;
use hostbridge_core::error::BridgeError;
use hostbridge_core::event::{BridgeEvent, EventKind};
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use hostbridge_gateway::{ControlCall, ControlReply, Transport};
use serde_json::{Value, json};

fn config(workers: usize) -> AppConfig {
    let mut config = AppConfig {
        default_provider: "host".into(),
        default_model: "on-device".into(),
        ..AppConfig::default()
    };
    config.bridge.call_workers = workers;
    config
}

fn started(workers: usize, logs: &tempfile::TempDir) -> Transport {
    let transport = Transport::start(config(workers)).unwrap();
    let reply = transport
        .send_call(ControlCall::new(
            "initialize",
            json!({ "logDirectory": logs.path() }),
        ))
        .wait();
    assert!(reply.ok, "{reply:?}");
    transport
}

fn correlation_id(event: &BridgeEvent) -> CorrelationId {
    serde_json::from_value(event.payload["correlationId"].clone()).unwrap()
}

fn query(transport: &Transport, params: Value) -> JoinHandle<ControlReply> {
    let handle = transport.send_call(ControlCall::new("handleQuery", params));
    thread::spawn(move || handle.wait())
}

/// Poll until `waiter` finishes, passing every event to `on_event`.
fn drive_host(
    transport: &Transport,
    waiter: &JoinHandle<ControlReply>,
    mut on_event: impl FnMut(&Transport, &BridgeEvent),
) -> Vec<BridgeEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    loop {
        let finished = waiter.is_finished();
        for event in transport.poll_events().unwrap() {
            on_event(transport, &event);
            seen.push(event);
        }
        if finished {
            return seen;
        }
        assert!(Instant::now() < deadline, "host loop timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn everything_but_initialize_is_rejected_before_init() {
    let transport = Transport::start(config(1)).unwrap();

    let reply = transport
        .send_call(ControlCall::new("getStatus", Value::Null))
        .wait();
    assert_eq!(reply.code(), Some("uninitialized"));

    let reply = transport
        .send_call(ControlCall::new("handleQuery", json!({"text": "hi"})))
        .wait();
    assert_eq!(reply.code(), Some("uninitialized"));

    assert_eq!(transport.poll_events().unwrap_err(), BridgeError::Uninitialized);
    assert_eq!(
        transport
            .push_response(CorrelationId::new(), ToolOutcome::ok(Value::Null))
            .unwrap_err(),
        BridgeError::Uninitialized
    );
}

#[test]
fn query_round_trip_on_a_single_call_worker() {
    let logs = tempfile::tempdir().unwrap();
    let transport = started(1, &logs);
    let waiter = query(&transport, json!({"text": "What does /tmp/a.png say?"}));

    let mut inferences = 0;
    let mut status_mid_flight = None;
    let events = drive_host(&transport, &waiter, |transport, event| match event.kind {
        EventKind::ModelInferenceRequested => {
            inferences += 1;
            let payload = if inferences == 1 {
                json!({"function_call": {"name": "ocr", "arguments": "{\"path\": \"/tmp/a.png\""}})
            } else {
                json!("The image says hello.")
            };
            transport
                .push_response(correlation_id(event), ToolOutcome::ok(payload))
                .unwrap();
        }
        EventKind::ToolInvocationRequested => {
            assert_eq!(event.payload["toolName"], "ocr");
            assert_eq!(event.payload["arguments"]["path"], "/tmp/a.png");

            // The only call worker is busy with handleQuery, yet status answers
            let status = transport
                .send_call(ControlCall::new("getStatus", Value::Null))
                .wait();
            status_mid_flight = status.result;

            let reply = transport
                .send_call(ControlCall::new(
                    "deliverToolResult",
                    json!({
                        "correlationId": event.payload["correlationId"],
                        "outcome": {"success": true, "payload": {"text": "hello"}}
                    }),
                ))
                .wait();
            assert!(reply.ok);
        }
        EventKind::ProgressUpdate => {}
    });

    let reply = waiter.join().unwrap();
    assert!(reply.ok, "{reply:?}");
    let result = reply.result.unwrap();
    assert_eq!(result["outcome"], "done");
    assert_eq!(result["answer"], "The image says hello.");
    assert_eq!(result["toolCalls"], 1);
    assert_eq!(result["steps"], 1);

    let status = status_mid_flight.unwrap();
    assert_eq!(status["activeSessions"], 1);
    assert_eq!(status["outstandingCalls"], 1);

    // Sequence numbers are gap-free and in order
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(inferences, 2);
    assert!(logs.path().join("hostbridge.log").exists());
}

#[test]
fn cancel_during_tool_wait() {
    let logs = tempfile::tempdir().unwrap();
    let transport = started(2, &logs);
    let waiter = query(&transport, json!({"text": "transcode", "sessionId": "s-cancel"}));

    drive_host(&transport, &waiter, |transport, event| match event.kind {
        EventKind::ModelInferenceRequested => {
            let payload = json!({"tool_calls": [{"name": "transcode", "arguments": "{}"}]});
            transport
                .push_response(correlation_id(event), ToolOutcome::ok(payload))
                .unwrap();
        }
        EventKind::ToolInvocationRequested => {
            let reply = transport
                .send_call(ControlCall::new("cancelSession", json!({"sessionId": "s-cancel"})))
                .wait();
            assert_eq!(reply.result.unwrap()["cancelled"], true);
            transport
                .push_response(correlation_id(event), ToolOutcome::ok(json!("done")))
                .unwrap();
        }
        EventKind::ProgressUpdate => {}
    });

    let result = waiter.join().unwrap().result.unwrap();
    assert_eq!(result["outcome"], "cancelled");
    assert_eq!(result["toolCalls"], 1);
    let history = result["history"].as_array().unwrap();
    let tool_msgs: Vec<_> = history.iter().filter(|m| m["role"] == "tool").collect();
    assert_eq!(tool_msgs.len(), 1);
    assert_eq!(tool_msgs[0]["metadata"]["kind"], "cancelled");
    assert_eq!(tool_msgs[0]["metadata"]["success"], false);
}

#[test]
fn shutdown_fails_outstanding_inference() {
    let logs = tempfile::tempdir().unwrap();
    let transport = started(1, &logs);
    let waiter = query(&transport, json!({"text": "hello"}));

    // Wait for the inference request, then shut down instead of answering it
    let deadline = Instant::now() + Duration::from_secs(10);
    'outer: loop {
        for event in transport.poll_events().unwrap() {
            if event.kind == EventKind::ModelInferenceRequested {
                break 'outer;
            }
        }
        assert!(Instant::now() < deadline, "no inference request");
        thread::sleep(Duration::from_millis(5));
    }

    let reply = transport
        .send_call(ControlCall::new("shutdown", Value::Null))
        .wait();
    assert!(reply.ok);

    let result = waiter.join().unwrap().result.unwrap();
    assert_eq!(result["outcome"], "failed");
    assert!(result["error"].as_str().unwrap().contains("closed"));

    let reply = transport
        .send_call(ControlCall::new("getStatus", Value::Null))
        .wait();
    assert_eq!(reply.code(), Some("uninitialized"));
}

#[tokio::test]
async fn call_handles_can_be_awaited() {
    let logs = tempfile::tempdir().unwrap();
    let transport = Transport::start(config(1)).unwrap();

    let reply = transport
        .send_call(ControlCall::new("initialize", json!({"logDirectory": logs.path()})))
        .await;
    assert!(reply.ok);

    let reply = transport
        .send_call(ControlCall::new("getStatus", Value::Null))
        .await;
    assert_eq!(reply.result.unwrap()["status"], "ready");

    let reply = transport
        .send_call(ControlCall::new("deliverToolResult", json!({"correlationId": "x"})))
        .await;
    assert_eq!(reply.code(), Some("invalid_params"));
}
