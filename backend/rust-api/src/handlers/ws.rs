use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::{
    metrics::WS_CONNECTIONS_ACTIVE,
    models::contest::{ContestClientEvent, ContestServerEvent},
    services::{contest_service::ContestService, AppState},
};

const OUTBOUND_BUFFER: usize = 32;

/// GET /ws/contests
pub async fn contest_socket(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    WS_CONNECTIONS_ACTIVE.inc();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ContestServerEvent>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode contest event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut rooms: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let replies = match serde_json::from_str::<ContestClientEvent>(text.as_str()) {
            Ok(ContestClientEvent::JoinContest {
                contest_id,
                user_id,
            }) => join(&state, &mut rooms, &tx, contest_id, &user_id).await,
            Ok(ContestClientEvent::LeaveContest { contest_id }) => {
                leave(&state, &mut rooms, &contest_id);
                vec![ContestServerEvent::Left { contest_id }]
            }
            Err(e) => vec![ContestServerEvent::Error {
                message: format!("Invalid event: {}", e),
            }],
        };

        let mut closed = false;
        for reply in replies {
            if tx.send(reply).await.is_err() {
                closed = true;
                break;
            }
        }
        if closed {
            break;
        }
    }

    let joined: Vec<String> = rooms.keys().cloned().collect();
    for contest_id in joined {
        leave(&state, &mut rooms, &contest_id);
    }
    drop(tx);
    let _ = writer.await;

    WS_CONNECTIONS_ACTIVE.dec();
    tracing::debug!("Contest socket closed");
}

/// Subscribes the socket to the room and returns the acknowledgement plus the
/// current leaderboard snapshot when one is available.
async fn join(
    state: &Arc<AppState>,
    rooms: &mut HashMap<String, JoinHandle<()>>,
    tx: &mpsc::Sender<ContestServerEvent>,
    contest_id: String,
    user_id: &str,
) -> Vec<ContestServerEvent> {
    if !rooms.contains_key(&contest_id) {
        let receiver = state.contests.subscribe(&contest_id);
        rooms.insert(contest_id.clone(), forward_room(receiver, tx.clone()));
        tracing::info!(contest_id = %contest_id, user_id, "Joined contest room");
    }

    let mut replies = vec![ContestServerEvent::Joined {
        contest_id: contest_id.clone(),
    }];
    match ContestService::from_state(state).leaderboard(&contest_id).await {
        Ok(leaderboard) => replies.push(ContestServerEvent::LeaderboardUpdate(leaderboard)),
        Err(e) => tracing::warn!(contest_id = %contest_id, error = %e, "Leaderboard snapshot unavailable"),
    }
    replies
}

fn leave(state: &AppState, rooms: &mut HashMap<String, JoinHandle<()>>, contest_id: &str) {
    if let Some(task) = rooms.remove(contest_id) {
        task.abort();
        state.contests.prune(contest_id);
        tracing::debug!(contest_id, "Left contest room");
    }
}

/// Pumps room broadcasts into the socket's outbound queue. Slow sockets skip
/// the events they lagged behind on.
fn forward_room(
    mut receiver: broadcast::Receiver<ContestServerEvent>,
    tx: mpsc::Sender<ContestServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Contest socket lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contest::ContestPhase;
    use crate::services::contest_hub::ContestHub;

    #[tokio::test]
    async fn room_events_reach_the_socket_queue() {
        let hub = ContestHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let task = forward_room(hub.subscribe("c1"), tx);

        let event = ContestServerEvent::ContestStatus {
            contest_id: "c1".to_string(),
            status: ContestPhase::Ongoing,
        };
        assert_eq!(hub.publish("c1", event.clone()), 1);
        assert_eq!(rx.recv().await, Some(event));

        task.abort();
    }

    #[tokio::test]
    async fn forwarding_stops_when_socket_is_gone() {
        let hub = ContestHub::new();
        let (tx, rx) = mpsc::channel(1);
        let task = forward_room(hub.subscribe("c2"), tx);
        drop(rx);

        hub.publish(
            "c2",
            ContestServerEvent::Error {
                message: "x".to_string(),
            },
        );
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("forwarder should exit")
            .unwrap();
    }
}
