use super::*;

use glam::Mat4;

use crate::scene::SceneRegistry;

fn scene() -> SceneRegistry {
    let mut scene = SceneRegistry::new();
    scene.insert("box", Vec3::splat(0.5), Mat4::IDENTITY);
    scene
}

fn type_keys(controller: &mut InteractionController, keys: &[&str]) -> Vec<Action> {
    keys.iter().flat_map(|k| controller.on_key(&Key::new(k))).collect()
}

/// Pointer over the box at the center of the default camera's view.
fn hover_box(controller: &mut InteractionController) {
    controller.on_pointer_move(Vec2::ZERO, &Camera::default(), &scene());
    assert_eq!(controller.hovered(), Some("box"));
}

/// Pointer over empty space in the corner of the view.
fn hover_nothing(controller: &mut InteractionController) {
    controller.on_pointer_move(Vec2::new(0.9, 0.9), &Camera::default(), &scene());
    assert_eq!(controller.hovered(), None);
}

fn hover_only() -> InteractionController {
    InteractionController::new('/', AnnotationPolicy::HoverOnly, DEFAULT_MARKER_DISTANCE)
}

// =============================================================
// Pointer
// =============================================================

#[test]
fn hit_records_world_and_local_points() {
    let mut controller = InteractionController::default();
    let actions = controller.on_pointer_move(Vec2::ZERO, &Camera::default(), &scene());

    assert_eq!(controller.hovered(), Some("box"));
    assert_eq!(actions, vec![Action::SetCursor(controller.last_world())]);
    assert!((controller.last_local() - Vec3::new(-0.5, 0.5, 0.5)).length() < 1e-3);
}

#[test]
fn miss_places_cursor_on_the_view_plane() {
    let mut controller = InteractionController::default();
    let camera = Camera::default();
    hover_nothing(&mut controller);

    let depth = (controller.last_world() - camera.position).dot(camera.forward());
    assert!((depth - DEFAULT_MARKER_DISTANCE).abs() < 1e-2);
}

#[test]
fn miss_keeps_last_local_point() {
    let mut controller = InteractionController::default();
    hover_box(&mut controller);
    let local = controller.last_local();
    hover_nothing(&mut controller);
    assert_eq!(controller.last_local(), local);
}

#[test]
fn marker_visible_when_hovered_or_armed() {
    let mut controller = InteractionController::default();
    assert!(!controller.marker_visible());
    assert_eq!(controller.highlight(), Highlight::Inactive);

    controller.on_key(&Key::from('/'));
    assert!(controller.marker_visible());
    assert_eq!(controller.highlight(), Highlight::Armed);

    hover_box(&mut controller);
    assert_eq!(controller.highlight(), Highlight::HoveredArmed);

    controller.on_key(&Key::new(Key::ESCAPE));
    assert_eq!(controller.highlight(), Highlight::Hovered);
}

// =============================================================
// Keyboard
// =============================================================

#[test]
fn hovered_annotation_uses_local_point_and_parent() {
    let mut controller = InteractionController::default();
    hover_box(&mut controller);
    let local = controller.last_local();

    let actions = type_keys(&mut controller, &["/", "a", "b", Key::ENTER]);
    assert_eq!(actions.len(), 1);
    let Action::AddAnnotation { text, parent, position, .. } = &actions[0] else {
        panic!("expected an annotation");
    };
    assert_eq!(text, "ab");
    assert_eq!(parent.as_deref(), Some("box"));
    assert_eq!(*position, local);
    assert_eq!(controller.mode(), Mode::Idle);
    assert_eq!(controller.buffer(), "");
}

#[test]
fn free_space_annotation_uses_world_point() {
    let mut controller = InteractionController::default();
    hover_nothing(&mut controller);
    let world = controller.last_world();

    let actions = type_keys(&mut controller, &["/", "h", "i", Key::ENTER]);
    assert_eq!(actions.len(), 1);
    let Action::AddAnnotation { parent, position, .. } = &actions[0] else {
        panic!("expected an annotation");
    };
    assert_eq!(*parent, None);
    assert_eq!(*position, world);
}

#[test]
fn each_annotation_gets_a_fresh_id() {
    let mut controller = InteractionController::default();
    let first = type_keys(&mut controller, &["/", "a", Key::ENTER]);
    let second = type_keys(&mut controller, &["/", "a", Key::ENTER]);
    let (Action::AddAnnotation { id: a, .. }, Action::AddAnnotation { id: b, .. }) = (&first[0], &second[0]) else {
        panic!("expected annotations");
    };
    assert_ne!(a, b);
}

#[test]
fn trigger_clears_the_buffer() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", "x", Key::ESCAPE, "/"]);
    assert_eq!(controller.mode(), Mode::Armed);
    assert_eq!(controller.buffer(), "");
}

#[test]
fn trigger_while_armed_is_typed() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", "a", "/", "b"]);
    assert_eq!(controller.buffer(), "a/b");
}

#[test]
fn escape_discards_without_creating() {
    let mut controller = InteractionController::default();
    let actions = type_keys(&mut controller, &["/", "a", Key::ESCAPE, Key::ENTER]);
    assert!(actions.is_empty());
    assert_eq!(controller.mode(), Mode::Idle);
}

#[test]
fn backspace_to_empty_disarms() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", "a", "b", Key::BACKSPACE]);
    assert_eq!(controller.buffer(), "a");
    assert_eq!(controller.mode(), Mode::Armed);

    controller.on_key(&Key::new(Key::BACKSPACE));
    assert_eq!(controller.mode(), Mode::Idle);
}

#[test]
fn backspace_right_after_trigger_disarms() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", Key::BACKSPACE]);
    assert_eq!(controller.mode(), Mode::Idle);
}

#[test]
fn idle_ignores_typing_and_enter() {
    let mut controller = InteractionController::default();
    let actions = type_keys(&mut controller, &["a", "b", Key::ENTER]);
    assert!(actions.is_empty());
    assert_eq!(controller.buffer(), "");
}

#[test]
fn named_keys_are_not_typed() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", "a", "Shift", "ArrowLeft", "\t"]);
    assert_eq!(controller.buffer(), "a");
}

#[test]
fn unicode_characters_are_typed() {
    let mut controller = InteractionController::default();
    type_keys(&mut controller, &["/", "é", "ß"]);
    assert_eq!(controller.buffer(), "éß");
}

#[test]
fn custom_trigger_arms() {
    let mut controller = InteractionController::new('#', AnnotationPolicy::Anywhere, DEFAULT_MARKER_DISTANCE);
    type_keys(&mut controller, &["/"]);
    assert_eq!(controller.mode(), Mode::Idle);
    type_keys(&mut controller, &["#"]);
    assert_eq!(controller.mode(), Mode::Armed);
}

// =============================================================
// Hover-only policy
// =============================================================

#[test]
fn hover_only_ignores_keys_over_empty_space() {
    let mut controller = hover_only();
    hover_nothing(&mut controller);
    let actions = type_keys(&mut controller, &["/", "a", Key::ENTER]);
    assert!(actions.is_empty());
    assert_eq!(controller.mode(), Mode::Idle);
}

#[test]
fn hover_only_resets_when_pointer_leaves() {
    let mut controller = hover_only();
    hover_box(&mut controller);
    type_keys(&mut controller, &["/", "a"]);
    assert_eq!(controller.mode(), Mode::Armed);

    hover_nothing(&mut controller);
    // Still armed until the next key arrives off-object.
    assert_eq!(controller.mode(), Mode::Armed);
    type_keys(&mut controller, &["b"]);
    assert_eq!(controller.mode(), Mode::Idle);
    assert_eq!(controller.buffer(), "");
}

#[test]
fn hover_only_creates_on_object() {
    let mut controller = hover_only();
    hover_box(&mut controller);
    let actions = type_keys(&mut controller, &["/", "o", "k", Key::ENTER]);
    assert!(matches!(
        actions.as_slice(),
        [Action::AddAnnotation { parent: Some(p), text, .. }] if p == "box" && text == "ok"
    ));
}
