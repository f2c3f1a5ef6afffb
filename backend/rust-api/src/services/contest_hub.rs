use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::metrics::CONTEST_EVENTS_TOTAL;
use crate::models::contest::ContestServerEvent;

const ROOM_CAPACITY: usize = 64;

/// In-process fan-out of contest events, one broadcast channel per room.
/// Rooms are created on first join and dropped once nobody listens.
#[derive(Default)]
pub struct ContestHub {
    rooms: Mutex<HashMap<String, Sender<ContestServerEvent>>>,
}

pub fn room_name(contest_id: &str) -> String {
    format!("contest_{}", contest_id)
}

impl ContestHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, contest_id: &str) -> Receiver<ContestServerEvent> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .entry(room_name(contest_id))
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Sends `event` to everyone in the contest room; returns how many received it
    pub fn publish(&self, contest_id: &str, event: ContestServerEvent) -> usize {
        let room = room_name(contest_id);
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());

        let Some(sender) = rooms.get(&room) else {
            return 0;
        };

        CONTEST_EVENTS_TOTAL.with_label_values(&[event.name()]).inc();
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                rooms.remove(&room);
                0
            }
        }
    }

    /// Drops rooms whose last receiver went away
    pub fn prune(&self, contest_id: &str) {
        let room = room_name(contest_id);
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if rooms.get(&room).is_some_and(|sender| sender.receiver_count() == 0) {
            rooms.remove(&room);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contest::ContestPhase;

    fn status(contest_id: &str) -> ContestServerEvent {
        ContestServerEvent::ContestStatus {
            contest_id: contest_id.to_string(),
            status: ContestPhase::Ongoing,
        }
    }

    #[tokio::test]
    async fn members_of_a_room_receive_events() {
        let hub = ContestHub::new();
        let mut first = hub.subscribe("c1");
        let mut second = hub.subscribe("c1");
        let mut other = hub.subscribe("c2");

        assert_eq!(hub.publish("c1", status("c1")), 2);
        assert_eq!(first.recv().await.unwrap(), status("c1"));
        assert_eq!(second.recv().await.unwrap(), status("c1"));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn publishing_to_empty_room_is_a_no_op() {
        let hub = ContestHub::new();
        assert_eq!(hub.publish("nobody", status("nobody")), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn rooms_are_pruned_after_last_leave() {
        let hub = ContestHub::new();
        let receiver = hub.subscribe("c1");
        assert_eq!(hub.room_count(), 1);

        drop(receiver);
        hub.prune("c1");
        assert_eq!(hub.room_count(), 0);
        assert_eq!(room_name("c1"), "contest_c1");
    }
}
