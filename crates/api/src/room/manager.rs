//! Global room table: creation, lookup, caps, and idle eviction.

use std::sync::Arc;
use std::time::Duration;

use babblefish_config::Settings;
use babblefish_pipeline::Pipeline;
use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::protocol::ROOM_ID_LEN;
use crate::room::room::{JoinAccepted, JoinError, JoinRequest, Room, RoomCommand, RoomHandle};

// Matches the wire shape `[A-Z2-9]`: no 0/1 to avoid O/I confusion.
const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ23456789";

#[derive(Debug, Error)]
pub enum JoinRejected {
    #[error("Room is full (max {0} participants)")]
    RoomFull(usize),
    #[error("Maximum number of rooms ({0}) reached")]
    ServerFull(usize),
    #[error("internal error")]
    Internal,
}

pub struct RoomManager {
    rooms: Arc<DashMap<String, RoomHandle>>,
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
}

impl RoomManager {
    pub fn new(settings: Arc<Settings>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings,
            pipeline,
        }
    }

    /// Admits a validated join into `room_id`, creating the room on demand.
    /// Returns the join acknowledgement plus the room's command sender for
    /// the rest of the session.
    pub async fn join(
        &self,
        room_id: &str,
        request: JoinRequest,
    ) -> Result<(JoinAccepted, mpsc::Sender<RoomCommand>), JoinRejected> {
        let mut request = Some(request);

        // A room can expire between lookup and send; retry once with a
        // fresh one.
        for _ in 0..2 {
            let handle = self.get_or_create(room_id)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = RoomCommand::Join {
                request: request.take().expect("request available"),
                reply: reply_tx,
            };

            match handle.tx.send(cmd).await {
                Ok(()) => {
                    return match reply_rx.await {
                        Ok(Ok(accepted)) => Ok((accepted, handle.tx.clone())),
                        Ok(Err(JoinError::RoomFull(max))) => Err(JoinRejected::RoomFull(max)),
                        Ok(Err(JoinError::Internal)) => Err(JoinRejected::Internal),
                        Err(_) => Err(JoinRejected::Internal),
                    };
                }
                Err(mpsc::error::SendError(RoomCommand::Join {
                    request: returned, ..
                })) => {
                    // Stale entry for a room task that already exited.
                    self.rooms
                        .remove_if(room_id, |_, h| h.tx.same_channel(&handle.tx));
                    request = Some(returned);
                }
                Err(_) => return Err(JoinRejected::Internal),
            }
        }

        warn!(room_id, "failed to reach a live room task");
        Err(JoinRejected::Internal)
    }

    fn get_or_create(&self, room_id: &str) -> Result<RoomHandle, JoinRejected> {
        if let Some(handle) = self.rooms.get(room_id) {
            return Ok(handle.clone());
        }

        let max_rooms = self.settings.rooms.max_rooms;
        if self.rooms.len() >= max_rooms {
            self.evict_expired();
            if self.rooms.len() >= max_rooms {
                warn!(room_id, max_rooms, "room creation rejected at cap");
                return Err(JoinRejected::ServerFull(max_rooms));
            }
        }

        let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            Room::spawn(
                room_id.to_string(),
                self.pipeline.clone(),
                self.settings.clone(),
                self.rooms.clone(),
            )
        });
        Ok(entry.value().clone())
    }

    /// Reclaims rooms that have been empty longer than the grace period.
    /// They are on their way out anyway; this just frees capacity now.
    fn evict_expired(&self) {
        let grace = Duration::from_secs(self.settings.rooms.room_timeout_seconds);
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| {
                entry.value().participant_count() == 0
                    && entry.value().empty_for().is_some_and(|idle| idle >= grace)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for room_id in expired {
            if let Some((_, handle)) = self.rooms.remove(&room_id) {
                let _ = handle.tx.try_send(RoomCommand::Shutdown);
                info!(room_id, "evicted idle room");
            }
        }
    }

    /// Mints an unused room code from the wire alphabet.
    pub fn generate_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (0..ROOM_ID_LEN)
                .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_participants(&self) -> usize {
        self.rooms
            .iter()
            .map(|entry| entry.value().participant_count())
            .sum()
    }
}
