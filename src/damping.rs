//! Per-frame smoothing of rendered values toward their targets.
//!
//! DESIGN
//! ======
//! Every rendered value (local marker, each peer's marker, each shared
//! object's transform) moves toward its target by
//! `lerp(value, target, 1 - exp(-rate * dt))` once per tick. Elapsed time is
//! passed in by the host; the damper's clock is the sum of those ticks and is
//! the only time source for drag-lock expiry.
//!
//! Each object carries a `DragLock`. `LockedByLocal` stops damping toward the
//! store value so only direct pointer updates move the object. A remote write
//! marks the object `LockedByRemote` for a short window; that state is purely
//! informational and damping continues through it.

#[cfg(test)]
#[path = "damping_test.rs"]
mod damping_test;

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};
use tracing::debug;

use crate::model::{ObjectTransform, Presence};
use crate::replication::ConnectionId;

pub const DEFAULT_CURSOR_RATE: f32 = 50.0;
pub const DEFAULT_PEER_RATE: f32 = 10.0;
pub const DEFAULT_OBJECT_RATE: f32 = 20.0;
pub const DEFAULT_REMOTE_DRAG_TTL: f32 = 0.25;

// =============================================================================
// SMOOTHING
// =============================================================================

/// Fraction of the remaining distance covered in `dt` at `rate`, in `[0, 1]`.
#[must_use]
pub fn damp_factor(rate: f32, dt: f32) -> f32 {
    if dt <= 0.0 || rate <= 0.0 {
        return 0.0;
    }
    (1.0 - (-rate * dt).exp()).clamp(0.0, 1.0)
}

#[must_use]
pub fn damp(value: f32, target: f32, rate: f32, dt: f32) -> f32 {
    value + (target - value) * damp_factor(rate, dt)
}

#[must_use]
pub fn damp_vec3(value: Vec3, target: Vec3, rate: f32, dt: f32) -> Vec3 {
    value.lerp(target, damp_factor(rate, dt))
}

/// Component-wise over all sixteen entries.
#[must_use]
pub fn damp_mat4(value: Mat4, target: Mat4, rate: f32, dt: f32) -> Mat4 {
    let t = damp_factor(rate, dt);
    let mut out = value.to_cols_array();
    for (v, goal) in out.iter_mut().zip(target.to_cols_array()) {
        *v += (goal - *v) * t;
    }
    Mat4::from_cols_array(&out)
}

// =============================================================================
// DRAG LOCK
// =============================================================================

/// Who is currently moving an object, as far as this participant can tell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragLock {
    #[default]
    Unlocked,
    LockedByLocal,
    /// A remote write arrived at damper time `since` (seconds).
    LockedByRemote { since: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampingRates {
    pub cursor: f32,
    pub peer: f32,
    pub object: f32,
}

impl Default for DampingRates {
    fn default() -> Self {
        Self { cursor: DEFAULT_CURSOR_RATE, peer: DEFAULT_PEER_RATE, object: DEFAULT_OBJECT_RATE }
    }
}

#[derive(Debug, Clone, Copy)]
struct RenderedObject {
    /// `None` until first seen in storage or grabbed locally.
    matrix: Option<Mat4>,
    lock: DragLock,
}

// =============================================================================
// DAMPER
// =============================================================================

pub struct AnimationDamper {
    rates: DampingRates,
    remote_drag_ttl: f64,
    clock: f64,
    local_cursor: Vec3,
    peers: BTreeMap<ConnectionId, Vec3>,
    objects: BTreeMap<String, RenderedObject>,
}

impl Default for AnimationDamper {
    fn default() -> Self {
        Self::new(DampingRates::default(), DEFAULT_REMOTE_DRAG_TTL)
    }
}

impl AnimationDamper {
    /// `remote_drag_ttl` is in seconds.
    #[must_use]
    pub fn new(rates: DampingRates, remote_drag_ttl: f32) -> Self {
        Self {
            rates,
            remote_drag_ttl: f64::from(remote_drag_ttl),
            clock: 0.0,
            local_cursor: Vec3::ZERO,
            peers: BTreeMap::new(),
            objects: BTreeMap::new(),
        }
    }

    // --- Queries ---

    /// Seconds of ticks seen so far.
    #[must_use]
    pub fn clock(&self) -> f64 {
        self.clock
    }

    #[must_use]
    pub fn local_cursor(&self) -> Vec3 {
        self.local_cursor
    }

    #[must_use]
    pub fn peer(&self, connection: ConnectionId) -> Option<Vec3> {
        self.peers.get(&connection).copied()
    }

    pub fn peers(&self) -> impl Iterator<Item = (ConnectionId, Vec3)> + '_ {
        self.peers.iter().map(|(c, p)| (*c, *p))
    }

    #[must_use]
    pub fn object(&self, name: &str) -> Option<Mat4> {
        self.objects.get(name).and_then(|o| o.matrix)
    }

    #[must_use]
    pub fn lock(&self, name: &str) -> DragLock {
        self.objects.get(name).map_or(DragLock::Unlocked, |o| o.lock)
    }

    // --- Drag ---

    /// Take local control of `name`, starting from `current`.
    pub fn begin_drag(&mut self, name: &str, current: ObjectTransform) {
        let object = self.objects.entry(name.to_owned()).or_insert(RenderedObject { matrix: None, lock: DragLock::Unlocked });
        if matches!(object.lock, DragLock::LockedByRemote { .. }) {
            debug!(%name, "local drag over a remote drag");
        }
        object.matrix = Some(current);
        object.lock = DragLock::LockedByLocal;
    }

    /// Direct pointer-driven update. Returns false unless `name` is locally dragged.
    pub fn drag_to(&mut self, name: &str, matrix: ObjectTransform) -> bool {
        match self.objects.get_mut(name) {
            Some(object) if object.lock == DragLock::LockedByLocal => {
                object.matrix = Some(matrix);
                true
            }
            _ => false,
        }
    }

    /// Release local control; damping toward the store value resumes next tick.
    pub fn end_drag(&mut self, name: &str) {
        if let Some(object) = self.objects.get_mut(name) {
            if object.lock == DragLock::LockedByLocal {
                object.lock = DragLock::Unlocked;
            }
        }
    }

    /// Record that another participant wrote `name`'s transform.
    pub fn note_remote_write(&mut self, name: &str) {
        let since = self.clock;
        let object = self.objects.entry(name.to_owned()).or_insert(RenderedObject { matrix: None, lock: DragLock::Unlocked });
        if object.lock == DragLock::LockedByLocal {
            debug!(%name, "remote write during local drag");
        } else {
            object.lock = DragLock::LockedByRemote { since };
        }
    }

    // --- Tick ---

    /// Advance by `dt` seconds toward the given targets. Peers missing from
    /// `others` are dropped; new peers start at the origin.
    pub fn tick(
        &mut self,
        dt: f32,
        cursor: Vec3,
        others: &BTreeMap<ConnectionId, Presence>,
        objects: &BTreeMap<String, ObjectTransform>,
    ) {
        let dt = dt.max(0.0);
        self.clock += f64::from(dt);

        self.local_cursor = damp_vec3(self.local_cursor, cursor, self.rates.cursor, dt);

        self.peers.retain(|c, _| others.contains_key(c));
        for (connection, presence) in others {
            let marker = self.peers.entry(*connection).or_insert(Vec3::ZERO);
            *marker = damp_vec3(*marker, presence.cursor, self.rates.peer, dt);
        }

        for (name, target) in objects {
            let object = self.objects.entry(name.clone()).or_insert(RenderedObject { matrix: None, lock: DragLock::Unlocked });
            if let DragLock::LockedByRemote { since } = object.lock {
                if self.clock - since >= self.remote_drag_ttl {
                    object.lock = DragLock::Unlocked;
                }
            }
            object.matrix = match object.matrix {
                // First sight: appear in place.
                None => Some(*target),
                Some(current) if object.lock == DragLock::LockedByLocal => Some(current),
                Some(current) => Some(damp_mat4(current, *target, self.rates.object, dt)),
            };
        }
    }
}
