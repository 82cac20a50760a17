//! Geometry primitives for wall and projectile collision
//!
//! All functions are pure. Coordinates are normalized map units.

use serde::{Deserialize, Serialize};

/// A point or displacement in map space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector for an angle in degrees
    pub fn from_degrees(angle: i32) -> Self {
        let radians = f64::from(angle).to_radians();
        Self::new(radians.cos(), radians.sin())
    }

    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, `None` for a zero vector
    pub fn normalized(self) -> Option<Point> {
        let len = self.length();
        (len > f64::EPSILON).then(|| self.scale(1.0 / len))
    }
}

/// Does segment `[p1, p2]` cross the circle at `center` with `radius`?
///
/// Solves `|p1 + t(p2 - p1) - center|^2 = radius^2` and reports a hit when the
/// discriminant is non-negative and at least one root lies in `[0, 1]`. A
/// segment lying entirely inside the circle has both roots outside that range
/// and is therefore not reported.
pub fn segment_circle_intersects(p1: Point, p2: Point, center: Point, radius: f64) -> bool {
    let d = p2.sub(p1);
    let f = center.sub(p1);

    let a = d.dot(d);
    if a == 0.0 {
        return f.length() <= radius;
    }
    let b = -2.0 * f.dot(d);
    let c = f.dot(f) - radius * radius;

    let delta = b * b - 4.0 * a * c;
    if delta < 0.0 {
        return false;
    }

    let sqrt_delta = delta.sqrt();
    let t1 = (-b - sqrt_delta) / (2.0 * a);
    let t2 = (-b + sqrt_delta) / (2.0 * a);

    (0.0..=1.0).contains(&t1) || (0.0..=1.0).contains(&t2)
}

/// Does segment `[a1, a2]` intersect segment `[b1, b2]`?
///
/// Both cross-ratio parameters must fall in `[0, 1]`. Parallel (including
/// collinear) segments never intersect.
pub fn segment_segment_intersects(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let denom = (a1.x - a2.x) * (b1.y - b2.y) - (a1.y - a2.y) * (b1.x - b2.x);
    if denom == 0.0 {
        return false;
    }

    let t = ((a1.x - b1.x) * (b1.y - b2.y) - (a1.y - b1.y) * (b1.x - b2.x)) / denom;
    let u = -((a1.x - a2.x) * (a1.y - b1.y) - (a1.y - a2.y) * (a1.x - b1.x)) / denom;

    (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
}

/// Can two circles moving at constant velocity touch at some instant `t >= 0`?
///
/// Not on the tick path: player hits use the axis-aligned test in
/// `CombatSystem::hits_player`, which is what clients were tuned against.
pub fn circle_circle_collides(
    pos_a: Point,
    radius_a: f64,
    vel_a: Point,
    pos_b: Point,
    radius_b: f64,
    vel_b: Point,
) -> bool {
    let rel_vel = vel_a.sub(vel_b);
    let rel_pos = pos_a.sub(pos_b);
    let reach = radius_a + radius_b;

    let a = rel_vel.dot(rel_vel);
    let b = 2.0 * rel_pos.dot(rel_vel);
    let c = rel_pos.dot(rel_pos) - reach * reach;

    if c <= 0.0 {
        return true;
    }
    if a == 0.0 {
        return false;
    }

    let delta = b * b - 4.0 * a * c;
    if delta < 0.0 {
        return false;
    }

    // Latest contact instant; touching only in the past does not count.
    let t_exit = (-b + delta.sqrt()) / (2.0 * a);
    t_exit >= 0.0
}

/// Perpendicular distance from `p` to the infinite line through `a` and `b`
#[cfg(test)]
pub fn distance_to_line(p: Point, a: Point, b: Point) -> f64 {
    let d = b.sub(a);
    let len = d.length();
    if len == 0.0 {
        return p.sub(a).length();
    }
    (d.x * (a.y - p.y) - (a.x - p.x) * d.y).abs() / len
}
