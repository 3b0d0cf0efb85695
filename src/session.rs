//! Room session: the application root for one collaboration room.
//!
//! DESIGN
//! ======
//! `RoomSession` owns the room's `SceneStore` and everything that reads or
//! writes it: the interaction controller, the damper, and the part view.
//! Input handlers route controller actions into store mutations. `frame`
//! drains remote events, feeds the damper's drag locks and the part view, and
//! advances the animation by the host's elapsed time. Leaving consumes the
//! session, so nothing can touch the store after teardown.
//!
//! ERROR HANDLING
//! ==============
//! Only entering and leaving can fail. Everything in between is local and
//! optimistic; replication and build failures are logged where they happen.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use glam::Vec2;
use tracing::{debug, info};

use crate::cache::GeometryCache;
use crate::config::ViewerConfig;
use crate::damping::AnimationDamper;
use crate::interaction::{Action, InteractionController, Key};
use crate::kernel::KernelHandle;
use crate::model::{AnnotationId, Change, ObjectTransform, PartialPart, Storage};
use crate::part::{PartView, clamp_partial};
use crate::replication::{Connection, ReplicationError};
use crate::scene::{Camera, SceneQuery};
use crate::store::{Applied, SceneStore};

/// What one call to `frame` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Remote events that changed the replica.
    pub applied: usize,
    /// The displayed part geometry was replaced.
    pub geometry_changed: bool,
}

pub struct RoomSession {
    store: SceneStore,
    controller: InteractionController,
    damper: AnimationDamper,
    part: PartView,
    dragging: Option<String>,
}

impl RoomSession {
    /// Enter `config.room`, seeding with `initial` where the room has no state
    /// yet, and start building the part for the room's parameters.
    ///
    /// # Errors
    ///
    /// Returns the replication error if the room cannot be entered.
    pub async fn enter(
        connection: Connection,
        config: &ViewerConfig,
        kernel: KernelHandle,
        initial: Storage,
    ) -> Result<Self, ReplicationError> {
        let store = SceneStore::enter(connection, config.room.clone(), initial).await?;
        let controller =
            InteractionController::new(config.annotation_trigger, config.annotation_policy, config.marker_distance);
        let damper = AnimationDamper::new(config.rates, config.remote_drag_ttl_secs());
        let mut part = PartView::new(GeometryCache::with_capacity(kernel, config.cache_capacity));
        part.request(store.part());

        info!(room = %store.room(), connection = %store.connection_id(), "session started");
        Ok(Self { store, controller, damper, part, dragging: None })
    }

    /// Flush and leave the room.
    ///
    /// # Errors
    ///
    /// Returns the store's flush or leave error.
    pub async fn leave(self) -> Result<(), ReplicationError> {
        let room = self.store.room().clone();
        self.store.leave().await?;
        info!(%room, "session ended");
        Ok(())
    }

    // --- Accessors ---

    #[must_use]
    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    /// Direct store access for subscriptions and non-interactive edits.
    pub fn store_mut(&mut self) -> &mut SceneStore {
        &mut self.store
    }

    #[must_use]
    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    #[must_use]
    pub fn damper(&self) -> &AnimationDamper {
        &self.damper
    }

    #[must_use]
    pub fn part(&self) -> &PartView {
        &self.part
    }

    /// Wait for the pending part build, if any.
    pub async fn settle_part(&mut self) -> bool {
        self.part.settle().await
    }

    // --- Input ---

    pub fn pointer_move(&mut self, ndc: Vec2, camera: &Camera, scene: &dyn SceneQuery) {
        let actions = self.controller.on_pointer_move(ndc, camera, scene);
        self.apply(actions);
    }

    pub fn key(&mut self, key: &Key) {
        let actions = self.controller.on_key(key);
        self.apply(actions);
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) {
        self.store.remove_annotation(id);
    }

    /// Clamp `partial` into the parameter ranges, store it, and request the
    /// matching geometry.
    pub fn set_part(&mut self, partial: &PartialPart) {
        self.store.set_part(&clamp_partial(partial));
        self.part.request(self.store.part());
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SetCursor(cursor) => self.store.set_cursor(cursor),
                Action::AddAnnotation { id, position, text, parent } => {
                    self.store.add_annotation(id, position, &text, parent.as_deref());
                }
            }
        }
    }

    // --- Drag ---

    /// Start dragging `name` locally. Returns false for an unknown object.
    pub fn begin_drag(&mut self, name: &str) -> bool {
        let Some(current) = self.store.matrix(name) else {
            debug!(%name, "drag on unknown object ignored");
            return false;
        };
        self.end_drag();
        self.damper.begin_drag(name, current);
        self.dragging = Some(name.to_owned());
        true
    }

    /// Move the dragged object; rendered immediately and broadcast.
    pub fn drag_to(&mut self, matrix: ObjectTransform) {
        let Some(name) = self.dragging.as_deref() else {
            return;
        };
        self.damper.drag_to(name, matrix);
        self.store.set_matrix(name, matrix);
    }

    pub fn end_drag(&mut self) {
        if let Some(name) = self.dragging.take() {
            self.damper.end_drag(&name);
        }
    }

    #[must_use]
    pub fn dragging(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    // --- Frame ---

    /// Apply waiting remote events and advance animation by `dt` seconds.
    pub fn frame(&mut self, dt: f32) -> FrameReport {
        let me = self.store.connection_id();
        let applied = self.store.pump();
        let mut part_changed = false;
        for event in &applied {
            match event {
                Applied::Storage { change: Change::Object(name), origin } if *origin != me => {
                    self.damper.note_remote_write(name);
                }
                Applied::Storage { change: Change::Part, .. } => part_changed = true,
                _ => {}
            }
        }
        let mut geometry_changed = part_changed && self.part.request(self.store.part());
        geometry_changed |= self.part.poll();

        self.damper.tick(dt, self.controller.last_world(), self.store.others(), &self.store.storage().objects);
        FrameReport { applied: applied.len(), geometry_changed }
    }
}
