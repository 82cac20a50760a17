//! Position frames for the spectator display

use crate::ws::protocol::{EntityPosition, ServerMsg};

use super::combat::CombatSystem;
use super::player::Player;
use super::shots::Shot;

/// Builds the per-broadcast-tick frame
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    frames_built: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Living players plus every shot inside the visible overscan area
    pub fn build<'a>(
        &mut self,
        players: impl IntoIterator<Item = &'a Player>,
        shots: &[Shot],
    ) -> ServerMsg {
        self.frames_built += 1;

        let players = players
            .into_iter()
            .filter(|p| p.alive)
            .map(Player::entity_position)
            .collect();

        let shots = shots
            .iter()
            .filter(|s| CombatSystem::is_visible(s.position))
            .map(|s| EntityPosition {
                id: s.id,
                x: s.position.x,
                y: s.position.y,
                angle: s.angle,
            })
            .collect();

        ServerMsg::Positions { players, shots }
    }

    pub fn frames_built(&self) -> u64 {
        self.frames_built
    }
}
