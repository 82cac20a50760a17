//! Per-player authoritative state

use std::fmt;

use crate::ws::protocol::{EntityPosition, InputEvent};

use super::geometry::Point;

/// Player identity within a match, assigned in join order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a connected input session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub session: SessionId,
    pub name: String,

    // Position and movement
    pub position: Point,
    /// Facing in whole degrees
    pub angle: i32,
    /// Current speed, decays by drag while no movement is requested
    pub speed: f64,

    // Combat
    pub alive: bool,
    /// Set after firing until the reload message arrives
    pub reloading: bool,
    pub score: u32,

    /// Latest unprocessed input; newer messages overwrite older ones
    pending: Option<InputEvent>,
}

impl Player {
    pub fn new(id: PlayerId, session: SessionId, name: String, position: Point) -> Self {
        Self {
            id,
            session,
            name,
            position,
            angle: 0,
            speed: 0.0,
            alive: true,
            reloading: false,
            score: 0,
            pending: None,
        }
    }

    pub fn queue_input(&mut self, event: InputEvent) {
        self.pending = Some(event);
    }

    pub fn take_input(&mut self) -> Option<InputEvent> {
        self.pending.take()
    }

    /// Reset for a new round at `spawn`
    pub fn respawn(&mut self, spawn: Point) {
        self.position = spawn;
        self.angle = 0;
        self.speed = 0.0;
        self.alive = true;
        self.reloading = false;
        self.pending = None;
    }

    pub fn kill(&mut self) {
        self.alive = false;
        self.speed = 0.0;
        self.pending = None;
    }

    pub fn entity_position(&self) -> EntityPosition {
        EntityPosition {
            id: u64::from(self.id.0),
            x: self.position.x,
            y: self.position.y,
            angle: self.angle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::parse_player_message;

    fn player() -> Player {
        Player::new(PlayerId(3), SessionId(10), "Carol".into(), Point::new(0.1, 0.2))
    }

    #[test]
    fn last_input_wins() {
        let mut p = player();
        p.queue_input(parse_player_message("1/1:0/"));
        p.queue_input(parse_player_message("2/0.5:180/90"));

        let event = p.take_input().unwrap();
        assert_eq!(event.move_angle, 180);
        assert_eq!(event.shot_angle, 90);
        assert!(p.take_input().is_none());
    }

    #[test]
    fn respawn_revives_and_clears_state() {
        let mut p = player();
        p.queue_input(InputEvent::NONE);
        p.reloading = true;
        p.angle = 45;
        p.kill();
        assert!(!p.alive);

        p.respawn(Point::new(0.8, 0.9));
        assert!(p.alive);
        assert!(!p.reloading);
        assert_eq!(p.angle, 0);
        assert_eq!(p.position, Point::new(0.8, 0.9));
        assert!(p.take_input().is_none());
    }

    #[test]
    fn entity_position_uses_player_id() {
        let p = player();
        assert_eq!(p.entity_position().to_string(), "3/0.100000/0.200000/0");
    }
}
