use std::ops::{Add, AddAssign, Mul};

use serde::{Deserialize, Serialize};

use crate::{BeatClock, Harmony, HarmonyAnalyzer, HeardNote, MotionConfig, SourceId};

/// World-space position supplied by the geometry layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Ground-plane vector from `self` to `other`.
    pub fn planar_towards(&self, other: &Position) -> Force {
        Force::new(other.x - self.x, other.z - self.z)
    }

    pub fn translated(&self, delta: Force) -> Position {
        Position::new(self.x + delta.x, self.y, self.z + delta.z)
    }
}

/// Instantaneous push on the ground plane. Also used for velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Force {
    pub x: f64,
    pub z: f64,
}

impl Force {
    pub const ZERO: Self = Self { x: 0.0, z: 0.0 };

    pub const fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.z)
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    pub fn normalized(&self) -> Option<Force> {
        let length = self.length();
        (length > f64::EPSILON).then(|| Force::new(self.x / length, self.z / length))
    }

    pub fn clamped(&self, max_length: f64) -> Force {
        let length = self.length();
        if length > max_length && length > 0.0 {
            *self * (max_length / length)
        } else {
            *self
        }
    }
}

impl Add for Force {
    type Output = Force;

    fn add(self, rhs: Force) -> Force {
        Force::new(self.x + rhs.x, self.z + rhs.z)
    }
}

impl AddAssign for Force {
    fn add_assign(&mut self, rhs: Force) {
        self.x += rhs.x;
        self.z += rhs.z;
    }
}

impl Mul<f64> for Force {
    type Output = Force;

    fn mul(self, rhs: f64) -> Force {
        Force::new(self.x * rhs, self.z * rhs)
    }
}

/// Collision capability provided by the world layer.
pub trait CollisionQuery {
    fn would_collide(&self, position: Position, radius: f64, exclude_id: &str) -> bool;
}

impl<F> CollisionQuery for F
where
    F: Fn(Position, f64, &str) -> bool,
{
    fn would_collide(&self, position: Position, radius: f64, exclude_id: &str) -> bool {
        self(position, radius, exclude_id)
    }
}

/// World without obstacles.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenField;

impl CollisionQuery for OpenField {
    fn would_collide(&self, _position: Position, _radius: f64, _exclude_id: &str) -> bool {
        false
    }
}

/// Something that is currently sounding, as seen by the force field.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundSource {
    pub id: SourceId,
    pub position: Position,
    pub notes: Vec<HeardNote>,
}

impl SoundSource {
    pub fn new(id: impl Into<SourceId>, position: Position, notes: Vec<HeardNote>) -> Self {
        Self {
            id: id.into(),
            position,
            notes,
        }
    }
}

/// Turns harmony between sounding entities into motion.
#[derive(Debug, Clone)]
pub struct HarmonicForceField {
    analyzer: HarmonyAnalyzer,
    config: MotionConfig,
}

impl HarmonicForceField {
    pub fn new(analyzer: HarmonyAnalyzer, config: MotionConfig) -> Self {
        Self { analyzer, config }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Sum of the pushes `listener` receives from `sources` this step.
    /// Consonance pulls towards a source, dissonance pushes away, perfect
    /// intervals and non-simultaneous notes do nothing.
    pub fn force_on(&self, listener: &SoundSource, sources: &[SoundSource], clock: &BeatClock) -> Force {
        if listener.notes.is_empty() {
            return Force::ZERO;
        }

        let mut total = Force::ZERO;
        for source in sources {
            if source.id == listener.id || source.notes.is_empty() {
                continue;
            }

            let distance = listener.position.distance(&source.position);
            if distance > self.config.audible_range || distance <= self.config.min_separation {
                continue;
            }
            let Some(towards) = listener.position.planar_towards(&source.position).normalized() else {
                continue;
            };

            match self.analyzer.analyze(&listener.notes, &source.notes, clock) {
                Harmony::Consonant => total += towards * self.config.attraction,
                Harmony::Dissonant => total += towards * -self.config.repulsion,
                Harmony::Perfect | Harmony::None => {}
            }
        }
        total
    }
}

/// Persistent motion of one entity. Only velocity survives between steps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionState {
    pub velocity: Force,
}

impl MotionState {
    /// Adds this step's force, then damps and clamps the velocity.
    pub fn apply_force(&mut self, force: Force, config: &MotionConfig) {
        self.velocity = ((self.velocity + force) * config.damping).clamped(config.max_speed);
    }

    /// Moves `position` by the current velocity. A blocked move stops the
    /// entity where it stands.
    pub fn integrate(
        &mut self,
        id: &str,
        position: Position,
        delta_seconds: f64,
        collisions: &dyn CollisionQuery,
        config: &MotionConfig,
    ) -> Position {
        let candidate = position.translated(self.velocity * delta_seconds);
        if collisions.would_collide(candidate, config.body_radius, id) {
            self.velocity = Force::ZERO;
            position
        } else {
            candidate
        }
    }
}

/// Volume multiplier for a listener `distance` away from a source, using a
/// smoothed inverse-square falloff that reaches zero past `max_distance`.
pub fn distance_volume(distance: f64, max_distance: f64) -> f32 {
    if distance > max_distance || max_distance <= 0.0 {
        return 0.0;
    }
    let normalized = distance / max_distance;
    (1.0 / (1.0 + normalized * normalized)) as f32
}
