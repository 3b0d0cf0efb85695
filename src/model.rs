//! Shared-state model: object transforms, annotations, part parameters, presence.
//!
//! DESIGN
//! ======
//! `Storage` is the durable slice replicated to every participant in a room.
//! `Presence` is the ephemeral slice, broadcast per connection and never stored.
//! All durable mutations travel as `StorageOp` values and are applied through
//! `Storage::apply`, the single last-write-wins rule used by local replicas and
//! by the loopback hub alike. There are no version counters and no tombstones:
//! whichever op is applied last for a record is authoritative.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

/// Unique annotation identifier, generated by the creating participant.
pub type AnnotationId = Uuid;

/// 4x4 column-major transform of a named shared object (16 components on the wire).
pub type ObjectTransform = Mat4;

/// A spatial comment pinned to an object or floating in world space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// Local-space position when `parent` is set, world-space otherwise.
    pub position: Vec3,
    pub text: String,
    pub parent: Option<String>,
}

/// Numeric inputs of the parametric part. Any change is a new geometry key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartParameters {
    pub width: f64,
    pub cut1: f64,
    pub cut2: f64,
    pub offset: f64,
}

impl Default for PartParameters {
    fn default() -> Self {
        Self { width: 100.0, cut1: 40.0, cut2: 40.0, offset: 1.0 }
    }
}

impl PartParameters {
    /// Merge the present fields of `partial`. Returns true if any value changed.
    pub fn merge(&mut self, partial: &PartialPart) -> bool {
        let before = *self;
        if let Some(width) = partial.width {
            self.width = width;
        }
        if let Some(cut1) = partial.cut1 {
            self.cut1 = cut1;
        }
        if let Some(cut2) = partial.cut2 {
            self.cut2 = cut2;
        }
        if let Some(offset) = partial.offset {
            self.offset = offset;
        }
        before != *self
    }
}

/// Sparse update for `PartParameters`. Only present fields are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cut1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cut2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
}

/// Ephemeral per-connection state. Last received value wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub cursor: Vec3,
}

/// Durable room state shared by all participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub objects: BTreeMap<String, ObjectTransform>,
    pub annotations: Vec<Annotation>,
    pub part: PartParameters,
}

/// A durable mutation, broadcast to the room and applied at every replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StorageOp {
    SetMatrix { name: String, matrix: ObjectTransform },
    AddAnnotation { annotation: Annotation },
    RemoveAnnotation { id: AnnotationId },
    /// Whole-record replacement; the field-wise merge happens before broadcast.
    SetPart { part: PartParameters },
}

/// Subscription scope. Notifications fire only for the slice that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Objects,
    Annotations,
    Part,
    Others,
}

/// What a successful apply actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Object(String),
    Annotations,
    Part,
}

impl Change {
    #[must_use]
    pub fn slice(&self) -> Slice {
        match self {
            Self::Object(_) => Slice::Objects,
            Self::Annotations => Slice::Annotations,
            Self::Part => Slice::Part,
        }
    }
}

// =============================================================================
// APPLY
// =============================================================================

impl Storage {
    /// Apply one op with last-write-wins semantics. Returns `None` when the op
    /// left the storage unchanged (equal matrix, duplicate id, unknown id).
    pub fn apply(&mut self, op: &StorageOp) -> Option<Change> {
        match op {
            StorageOp::SetMatrix { name, matrix } => {
                if self.objects.get(name) == Some(matrix) {
                    return None;
                }
                self.objects.insert(name.clone(), *matrix);
                Some(Change::Object(name.clone()))
            }
            StorageOp::AddAnnotation { annotation } => {
                if self.annotations.iter().any(|a| a.id == annotation.id) {
                    return None;
                }
                self.annotations.push(annotation.clone());
                Some(Change::Annotations)
            }
            StorageOp::RemoveAnnotation { id } => {
                let before = self.annotations.len();
                self.annotations.retain(|a| a.id != *id);
                (self.annotations.len() != before).then_some(Change::Annotations)
            }
            StorageOp::SetPart { part } => {
                if self.part == *part {
                    return None;
                }
                self.part = *part;
                Some(Change::Part)
            }
        }
    }

    /// Seed from a durable snapshot: root keys present in `snapshot` win,
    /// missing ones fall back to `self`.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the merged document is not valid storage.
    pub fn merged_with_snapshot(&self, snapshot: &serde_json::Value) -> Result<Storage, serde_json::Error> {
        let mut merged = serde_json::to_value(self)?;
        if let (Some(base), Some(incoming)) = (merged.as_object_mut(), snapshot.as_object()) {
            for (k, v) in incoming {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(merged)
    }

    /// Annotations attached to the named object, in insertion order.
    pub fn annotations_for<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.annotations
            .iter()
            .filter(move |a| a.parent.as_deref() == Some(parent))
    }

    /// Parentless annotations, positioned in world space.
    pub fn global_annotations(&self) -> impl Iterator<Item = &Annotation> + '_ {
        self.annotations.iter().filter(|a| a.parent.is_none())
    }
}
