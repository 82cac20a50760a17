//! Shot physics - culling, wall impacts, player hits

use std::collections::HashSet;

use crate::maps::Wall;
use crate::util::time::TIME_FACTOR;

use super::geometry::{segment_circle_intersects, segment_segment_intersects, Point};
use super::physics::PLAYER_RADIUS;
use super::player::PlayerId;
use super::shots::Shot;

/// Map units a shot travels per tick
pub const SHOT_SPEED: f64 = 110.0 / 800.0 * TIME_FACTOR;

/// Radius used when testing a shot against walls (about one display pixel)
pub const SHOT_RADIUS: f64 = 0.00125;

/// Shots are culled once this far outside the unit square
pub const CULL_MARGIN: f64 = 0.05;

/// Frames include shots inside this range on both axes
pub const VISIBLE_MIN: f64 = -0.5;
pub const VISIBLE_MAX: f64 = 1.5;

/// A shot that struck a player this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitResult {
    pub shot_id: u64,
    pub shooter: PlayerId,
    pub target: PlayerId,
}

/// Outcome of one tick of shot collision resolution
#[derive(Debug, Default)]
pub struct ShotOutcome {
    /// Shots that left the arena or struck a wall
    pub expired: Vec<u64>,
    pub hits: Vec<HitResult>,
}

/// Combat system for resolving shots
pub struct CombatSystem;

impl CombatSystem {
    pub fn out_of_bounds(p: Point) -> bool {
        let range = -CULL_MARGIN..=1.0 + CULL_MARGIN;
        !range.contains(&p.x) || !range.contains(&p.y)
    }

    pub fn is_visible(p: Point) -> bool {
        let range = VISIBLE_MIN..=VISIBLE_MAX;
        range.contains(&p.x) && range.contains(&p.y)
    }

    /// Wall contact at the current position, or a crossing during the last step
    pub fn hits_wall(shot: &Shot, walls: &[Wall]) -> bool {
        let from = shot.previous_position();
        walls.iter().flat_map(Wall::edges).any(|(a, b)| {
            segment_circle_intersects(a, b, shot.position, SHOT_RADIUS)
                || segment_segment_intersects(from, shot.position, a, b)
        })
    }

    /// Axis-aligned proximity test against a player's position
    pub fn hits_player(shot: &Shot, target: Point) -> bool {
        (shot.position.x - target.x).abs() < PLAYER_RADIUS
            && (shot.position.y - target.y).abs() < PLAYER_RADIUS
    }

    /// Resolve every shot against the arena and the living players.
    /// A shot hits at most one player and a player dies at most once.
    pub fn resolve(shots: &[Shot], living: &[(PlayerId, Point)], walls: &[Wall]) -> ShotOutcome {
        let mut outcome = ShotOutcome::default();
        let mut killed: HashSet<PlayerId> = HashSet::new();

        for shot in shots {
            if Self::out_of_bounds(shot.position) || Self::hits_wall(shot, walls) {
                outcome.expired.push(shot.id);
                continue;
            }

            let target = living.iter().find(|(id, pos)| {
                *id != shot.owner && !killed.contains(id) && Self::hits_player(shot, *pos)
            });

            if let Some(&(target, _)) = target {
                killed.insert(target);
                outcome.hits.push(HitResult {
                    shot_id: shot.id,
                    shooter: shot.owner,
                    target,
                });
            }
        }

        outcome
    }
}
