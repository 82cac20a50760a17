//! Text wire protocol
//!
//! Controllers send `"<timestampNs>/<moveSpec>/<shotSpec>"`. The server pushes
//! `::`-separated notifications to the lifecycle sink and compact position
//! frames to the spectator sink.

use std::fmt;

use crate::game::player::PlayerId;

/// Decoded controller message. `-1` marks an absent field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub shot_angle: i32,
    pub move_speed: f64,
    pub move_angle: i32,
}

impl InputEvent {
    pub const NONE: InputEvent = InputEvent {
        shot_angle: -1,
        move_speed: -1.0,
        move_angle: -1,
    };

    pub fn wants_move(&self) -> bool {
        self.move_speed >= 0.0
    }

    pub fn wants_shot(&self) -> bool {
        self.shot_angle >= 0
    }
}

/// Parse a controller message. Malformed input yields [`InputEvent::NONE`]
/// or leaves the unparseable part unset; it never fails.
pub fn parse_player_message(message: &str) -> InputEvent {
    let parts: Vec<&str> = message.split('/').collect();
    let [_timestamp, move_spec, shot_spec] = parts.as_slice() else {
        return InputEvent::NONE;
    };

    let mut event = InputEvent::NONE;

    if !shot_spec.is_empty() {
        if let Ok(angle) = shot_spec.trim().parse::<i32>() {
            if (0..360).contains(&angle) {
                event.shot_angle = angle;
            }
        }
    }

    if let Some((speed, angle)) = move_spec.split_once(':') {
        let speed = speed.trim().parse::<f64>();
        let angle = angle.trim().parse::<i32>();
        if let (Ok(speed), Ok(angle)) = (speed, angle) {
            if speed.is_finite() && speed >= 0.0 {
                event.move_speed = speed;
                event.move_angle = angle;
            }
        }
    }

    event
}

/// Position entry `id/x/y/angle` used by frames and round announcements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub angle: i32,
}

impl fmt::Display for EntityPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:.6}/{:.6}/{}", self.id, self.x, self.y, self.angle)
    }
}

/// Messages pushed to the spectator and lifecycle sinks
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    NewGame {
        match_id: u64,
    },
    NewPlayer {
        player_id: PlayerId,
        name: String,
    },
    NewRound {
        players: Vec<EntityPosition>,
        map_json: String,
    },
    /// Per-broadcast-tick frame for the display
    Positions {
        players: Vec<EntityPosition>,
        shots: Vec<EntityPosition>,
    },
    EndRound {
        victor: PlayerId,
    },
    ScoreboardUpdate {
        scores: Vec<(PlayerId, u32)>,
    },
    EndGame {
        top_score: u32,
        winner: String,
    },
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for ServerMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMsg::NewGame { match_id } => write!(f, "NewGame::{match_id}"),
            ServerMsg::NewPlayer { player_id, name } => {
                write!(f, "NewPlayer::{player_id}/{name}")
            }
            ServerMsg::NewRound { players, map_json } => {
                f.write_str("NewRound::")?;
                write_list(f, players)?;
                write!(f, "::{map_json}")
            }
            ServerMsg::Positions { players, shots } => {
                write_list(f, players)?;
                f.write_str(":")?;
                write_list(f, shots)
            }
            ServerMsg::EndRound { victor } => write!(f, "EndRound::{victor}"),
            ServerMsg::ScoreboardUpdate { scores } => {
                f.write_str("ScoreboardUpdate::")?;
                for (i, (id, score)) in scores.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{id}/{score}")?;
                }
                Ok(())
            }
            ServerMsg::EndGame { top_score, winner } => {
                write!(f, "EndGame::{top_score}/{winner}")
            }
        }
    }
}
