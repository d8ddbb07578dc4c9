use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::bus::{EventBus, Topic};

use super::ApiState;

/// Bridge from the event bus to websocket clients: one bus subscription
/// fans into a broadcast channel, and every socket drains its own
/// receiver. A lagged socket drops events rather than slowing the bus.
#[derive(Clone)]
pub struct EventStream {
    tx: broadcast::Sender<Value>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register this stream on every bus topic. Call once at startup.
    pub fn attach(&self, bus: &EventBus) {
        let tx = self.tx.clone();
        bus.subscribe_all(move |topic: Topic, payload: Value| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(json!({
                    "event": topic.as_str(),
                    "data": payload,
                }));
                Ok(())
            })
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(256)
    }
}

pub async fn ws_endpoint(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

async fn handle_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<Value>) {
    tracing::debug!("websocket client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(_))) => {
                        let pong = json!({"type": "pong"}).to_string();
                        if socket.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(value) => {
                        if socket.send(Message::Text(value.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attached_stream_receives_bus_events_with_topic() {
        let bus = EventBus::new();
        let stream = EventStream::new(16);
        stream.attach(&bus);

        let mut rx = stream.subscribe();
        bus.publish(Topic::JobCompleted, json!({"job_id": "j1"})).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event["event"], "job_completed");
        assert_eq!(event["data"]["job_id"], "j1");
    }

    #[tokio::test]
    async fn stream_without_subscribers_drops_events() {
        let bus = EventBus::new();
        let stream = EventStream::new(16);
        stream.attach(&bus);

        // no receiver; publish must not error or wedge the bus
        bus.publish(Topic::JobFailed, json!({"job_id": "j2"})).await;
    }
}
