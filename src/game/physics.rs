//! Player movement and wall sliding

use crate::maps::{GameMap, Wall};
use crate::util::time::TIME_FACTOR;
use crate::ws::protocol::InputEvent;

use super::geometry::{segment_circle_intersects, Point};
use super::player::Player;

/// Player collision radius in map units
pub const PLAYER_RADIUS: f64 = 0.015;

/// Map units travelled per tick at speed 1
pub const MOVE_CALIBRATION: f64 = 80.0 / 800.0 * TIME_FACTOR;

/// Speed lost per tick while coasting
pub const DRAG: f64 = 0.05;

/// Controllers send speeds in [0, 1]; anything above this is clamped
pub const MAX_MOVE_SPEED: f64 = 100.0;

/// Physics system for updating player positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Apply this tick's input (or coast without one).
    /// Returns the requested shot angle, if any. Dead players do nothing.
    pub fn apply_input(player: &mut Player, input: Option<InputEvent>, map: &GameMap) -> Option<i32> {
        if !player.alive {
            return None;
        }

        match input {
            Some(event) if event.wants_move() => {
                player.speed = event.move_speed.min(MAX_MOVE_SPEED);
                player.angle = event.move_angle;
            }
            _ => {
                player.speed = (player.speed - DRAG).max(0.0);
            }
        }

        if player.speed > 0.0 {
            let displacement = Self::displacement(player.speed, player.angle);
            player.position =
                Self::resolve_movement(player.position, displacement, PLAYER_RADIUS, &map.walls);
        }

        input.filter(InputEvent::wants_shot).map(|e| e.shot_angle)
    }

    /// Per-tick displacement at `speed` along `angle` degrees
    pub fn displacement(speed: f64, angle: i32) -> Point {
        Point::from_degrees(angle).scale(speed * MOVE_CALIBRATION)
    }

    /// Move a circle of `radius` from `from` by `displacement`. The move is
    /// swept in sub-steps no longer than `radius`, so a fast player cannot
    /// jump a wall; each sub-step slides along the wall it touches and the
    /// sweep stops at the first blocked one.
    pub fn resolve_movement(from: Point, displacement: Point, radius: f64, walls: &[Wall]) -> Point {
        let length = displacement.length();
        let steps = if radius > 0.0 && length > radius {
            (length / radius).ceil() as usize
        } else {
            1
        };
        let step = displacement.scale(1.0 / steps as f64);

        let mut position = from;
        for _ in 0..steps {
            let next = Self::resolve_step(position, step, radius, walls);
            if next == position {
                break;
            }
            position = next;
        }
        position
    }

    /// Single sub-step: slide along the first wall edge the circle would
    /// touch. Returns `from` when even the slide is blocked.
    fn resolve_step(from: Point, displacement: Point, radius: f64, walls: &[Wall]) -> Point {
        let candidate = from.add(displacement);

        for wall in walls {
            for index in 0..wall.edge_count() {
                let (a, b) = wall.edge(index);
                if !circle_touches_edge(candidate, radius, a, b) {
                    continue;
                }

                let Some(slid) = slide_along(from, displacement, a, b) else {
                    return from;
                };

                let [prev, next] = wall.neighbours(index);
                let blocked = circle_touches_edge(slid, radius, a, b)
                    || circle_touches_edge(slid, radius, prev.0, prev.1)
                    || circle_touches_edge(slid, radius, next.0, next.1);
                if blocked || collides_with_any(slid, radius, walls) {
                    return from;
                }
                return slid;
            }
        }

        candidate
    }
}

/// Keep only the component of `displacement` running along edge `a -> b`
fn slide_along(from: Point, displacement: Point, a: Point, b: Point) -> Option<Point> {
    let tangent = b.sub(a).normalized()?;
    let along = displacement.dot(tangent);
    Some(from.add(tangent.scale(along)))
}

/// Circle/segment contact, including an edge lying wholly inside the circle
fn circle_touches_edge(center: Point, radius: f64, a: Point, b: Point) -> bool {
    segment_circle_intersects(a, b, center, radius) || a.sub(center).length() <= radius
}

fn collides_with_any(center: Point, radius: f64, walls: &[Wall]) -> bool {
    walls
        .iter()
        .flat_map(Wall::edges)
        .any(|(a, b)| circle_touches_edge(center, radius, a, b))
}
