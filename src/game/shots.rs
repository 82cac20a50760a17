//! Shot registry actor
//!
//! Owns the in-flight projectiles of one round. Every access goes through the
//! registry's own mailbox, so at most one mutation is in flight and a snapshot
//! always reflects a single point in time.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::combat::SHOT_SPEED;
use super::geometry::Point;
use super::player::PlayerId;

const SHOT_MAILBOX_CAPACITY: usize = 256;

/// Projectile in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    /// Increases monotonically within a match
    pub id: u64,
    /// Used for attribution and self-hit exclusion only
    pub owner: PlayerId,
    pub position: Point,
    /// Travel direction in degrees, fixed at launch
    pub angle: i32,
}

impl Shot {
    pub fn new(id: u64, owner: PlayerId, position: Point, angle: i32) -> Self {
        Self {
            id,
            owner,
            position,
            angle,
        }
    }

    /// Displacement covered in one simulation tick
    pub fn step(&self) -> Point {
        Point::from_degrees(self.angle).scale(SHOT_SPEED)
    }

    pub fn advance(&mut self) {
        self.position = self.position.add(self.step());
    }

    /// Position one tick ago
    pub fn previous_position(&self) -> Point {
        self.position.sub(self.step())
    }
}

enum ShotCommand {
    Add(Shot),
    AdvanceAll,
    Delete(u64),
    Snapshot(oneshot::Sender<Vec<Shot>>),
}

/// Errors talking to the shot registry
#[derive(Debug, thiserror::Error)]
pub enum ShotRegistryError {
    #[error("Shot registry has stopped")]
    Closed,
}

/// Actor state; lives inside its own task
pub struct ShotRegistry {
    shots: Vec<Shot>,
    mailbox: mpsc::Receiver<ShotCommand>,
}

impl ShotRegistry {
    /// Start a fresh, empty registry task. It stops once every handle is dropped.
    pub fn spawn() -> ShotRegistryHandle {
        let (tx, mailbox) = mpsc::channel(SHOT_MAILBOX_CAPACITY);
        let registry = Self {
            shots: Vec::new(),
            mailbox,
        };
        tokio::spawn(registry.run());
        ShotRegistryHandle { tx }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.mailbox.recv().await {
            self.handle(cmd);
        }
        debug!(remaining = self.shots.len(), "Shot registry stopped");
    }

    fn handle(&mut self, cmd: ShotCommand) {
        match cmd {
            ShotCommand::Add(shot) => self.shots.push(shot),
            ShotCommand::AdvanceAll => {
                for shot in &mut self.shots {
                    shot.advance();
                }
            }
            ShotCommand::Delete(id) => {
                if let Some(idx) = self.shots.iter().position(|s| s.id == id) {
                    self.shots.swap_remove(idx);
                }
            }
            ShotCommand::Snapshot(reply) => {
                // Requester may have given up; nothing to do then.
                let _ = reply.send(self.shots.clone());
            }
        }
    }
}

/// Cloneable address of a running shot registry
#[derive(Clone)]
pub struct ShotRegistryHandle {
    tx: mpsc::Sender<ShotCommand>,
}

impl ShotRegistryHandle {
    async fn send(&self, cmd: ShotCommand) -> Result<(), ShotRegistryError> {
        self.tx.send(cmd).await.map_err(|_| ShotRegistryError::Closed)
    }

    pub async fn add(&self, shot: Shot) -> Result<(), ShotRegistryError> {
        self.send(ShotCommand::Add(shot)).await
    }

    /// Move every shot by its per-tick displacement
    pub async fn advance_all(&self) -> Result<(), ShotRegistryError> {
        self.send(ShotCommand::AdvanceAll).await
    }

    /// Remove a shot. Unknown ids are ignored.
    pub async fn delete(&self, id: u64) -> Result<(), ShotRegistryError> {
        self.send(ShotCommand::Delete(id)).await
    }

    /// Copy of the current shot list, consistent with all earlier requests
    pub async fn snapshot(&self) -> Result<Vec<Shot>, ShotRegistryError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ShotCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| ShotRegistryError::Closed)
    }
}
