//! Interaction controller: pointer hover and keyboard annotation authoring.
//!
//! DESIGN
//! ======
//! Two independent pieces of state. `Hovered` follows the pointer: every move
//! casts a ray into the scene and records the hit (world and local point) or,
//! on a miss, a point on a view-aligned plane a fixed distance in front of the
//! camera. `Mode` follows the keyboard: the trigger key arms authoring, typed
//! characters accumulate, Enter commits, Escape or an emptied buffer disarms.
//!
//! The controller owns no shared state. Like the board engine, handlers return
//! `Action`s for the session to apply, which keeps the machine testable with
//! nothing but a camera and a scene double.

#[cfg(test)]
#[path = "interaction_test.rs"]
mod interaction_test;

use glam::{Vec2, Vec3};
use tracing::debug;
use uuid::Uuid;

use crate::model::AnnotationId;
use crate::scene::{Camera, SceneQuery};

pub const DEFAULT_TRIGGER: char = '/';
pub const DEFAULT_MARKER_DISTANCE: f32 = 17.32;

// =============================================================================
// TYPES
// =============================================================================

/// Authoring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    /// Trigger seen; typed characters go to the buffer.
    Armed,
}

/// Whether authoring needs an object under the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationPolicy {
    /// Annotate anywhere; over empty space the note floats at the free-space point.
    #[default]
    Anywhere,
    /// Only while hovering an object. Any key over empty space disarms and clears.
    HoverOnly,
}

/// A keyboard key as reported by the host: `"Escape"`, `"Enter"`,
/// `"Backspace"`, or the typed character itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(pub String);

impl Key {
    pub const ESCAPE: &'static str = "Escape";
    pub const ENTER: &'static str = "Enter";
    pub const BACKSPACE: &'static str = "Backspace";

    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.to_owned())
    }

    /// The character, if this key types exactly one.
    #[must_use]
    pub fn printable(&self) -> Option<char> {
        let mut chars = self.0.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_control() => Some(c),
            _ => None,
        }
    }
}

impl From<char> for Key {
    fn from(c: char) -> Self {
        Self(c.to_string())
    }
}

/// Side effects for the session to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetCursor(Vec3),
    AddAnnotation { id: AnnotationId, position: Vec3, text: String, parent: Option<String> },
}

/// Marker tint, from plain to "hovering and typing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Inactive,
    Armed,
    Hovered,
    HoveredArmed,
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct InteractionController {
    mode: Mode,
    hovered: Option<String>,
    buffer: String,
    last_world: Vec3,
    last_local: Vec3,
    trigger: char,
    policy: AnnotationPolicy,
    marker_distance: f32,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER, AnnotationPolicy::default(), DEFAULT_MARKER_DISTANCE)
    }
}

impl InteractionController {
    #[must_use]
    pub fn new(trigger: char, policy: AnnotationPolicy, marker_distance: f32) -> Self {
        Self {
            mode: Mode::Idle,
            hovered: None,
            buffer: String::new(),
            last_world: Vec3::ZERO,
            last_local: Vec3::ZERO,
            trigger,
            policy,
            marker_distance,
        }
    }

    // --- Queries ---

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn hovered(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn policy(&self) -> AnnotationPolicy {
        self.policy
    }

    /// Last pointer point in world space: the hit, or the free-space point.
    #[must_use]
    pub fn last_world(&self) -> Vec3 {
        self.last_world
    }

    /// Last hit point in the hovered object's local space.
    #[must_use]
    pub fn last_local(&self) -> Vec3 {
        self.last_local
    }

    #[must_use]
    pub fn marker_visible(&self) -> bool {
        self.hovered.is_some() || self.mode == Mode::Armed
    }

    #[must_use]
    pub fn highlight(&self) -> Highlight {
        match (self.hovered.is_some(), self.mode) {
            (true, Mode::Armed) => Highlight::HoveredArmed,
            (true, Mode::Idle) => Highlight::Hovered,
            (false, Mode::Armed) => Highlight::Armed,
            (false, Mode::Idle) => Highlight::Inactive,
        }
    }

    // --- Pointer ---

    /// Re-pick under the pointer at `ndc`. Always emits the new cursor position.
    pub fn on_pointer_move(&mut self, ndc: Vec2, camera: &Camera, scene: &dyn SceneQuery) -> Vec<Action> {
        let ray = camera.ray_from_ndc(ndc);
        match scene.intersect(&ray) {
            Some(hit) => {
                self.hovered = Some(hit.name);
                self.last_world = hit.point;
                self.last_local = hit.local_point;
            }
            None => {
                self.hovered = None;
                let facing = ray.direction.dot(camera.forward());
                let t = if facing > f32::EPSILON { self.marker_distance / facing } else { self.marker_distance };
                self.last_world = ray.at(t);
            }
        }
        vec![Action::SetCursor(self.last_world)]
    }

    // --- Keyboard ---

    pub fn on_key(&mut self, key: &Key) -> Vec<Action> {
        if self.policy == AnnotationPolicy::HoverOnly && self.hovered.is_none() {
            self.reset();
            return vec![];
        }

        match (self.mode, key.0.as_str()) {
            (Mode::Idle, _) if key.printable() == Some(self.trigger) => {
                self.mode = Mode::Armed;
                self.buffer.clear();
            }
            (Mode::Idle, _) => {}
            (Mode::Armed, Key::ESCAPE) => self.reset(),
            (Mode::Armed, Key::ENTER) => return vec![self.commit()],
            (Mode::Armed, Key::BACKSPACE) => {
                self.buffer.pop();
                if self.buffer.is_empty() {
                    self.mode = Mode::Idle;
                }
            }
            (Mode::Armed, _) => {
                if let Some(c) = key.printable() {
                    self.buffer.push(c);
                }
            }
        }
        vec![]
    }

    fn commit(&mut self) -> Action {
        let position = if self.hovered.is_some() { self.last_local } else { self.last_world };
        let action = Action::AddAnnotation {
            id: Uuid::new_v4(),
            position,
            text: std::mem::take(&mut self.buffer),
            parent: self.hovered.clone(),
        };
        debug!(parent = ?self.hovered, "annotation committed");
        self.mode = Mode::Idle;
        action
    }

    fn reset(&mut self) {
        self.mode = Mode::Idle;
        self.buffer.clear();
    }
}
