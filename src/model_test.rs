#![allow(clippy::float_cmp)]

use super::*;

fn note(text: &str, parent: Option<&str>) -> Annotation {
    Annotation { id: Uuid::new_v4(), position: Vec3::new(1.0, 2.0, 3.0), text: text.into(), parent: parent.map(str::to_owned) }
}

// =============================================================
// PartParameters
// =============================================================

#[test]
fn part_defaults_match_seed_values() {
    let part = PartParameters::default();
    assert_eq!(part.width, 100.0);
    assert_eq!(part.cut1, 40.0);
    assert_eq!(part.cut2, 40.0);
    assert_eq!(part.offset, 1.0);
}

#[test]
fn part_merge_applies_only_present_fields() {
    let mut part = PartParameters::default();
    let changed = part.merge(&PartialPart { width: Some(110.0), ..Default::default() });
    assert!(changed);
    assert_eq!(part.width, 110.0);
    assert_eq!(part.cut1, 40.0);
}

#[test]
fn part_merge_same_value_reports_unchanged() {
    let mut part = PartParameters::default();
    assert!(!part.merge(&PartialPart { cut2: Some(40.0), ..Default::default() }));
}

#[test]
fn partial_part_skips_absent_fields_on_wire() {
    let json = serde_json::to_value(PartialPart { offset: Some(2.0), ..Default::default() }).unwrap();
    assert_eq!(json, serde_json::json!({ "offset": 2.0 }));
}

// =============================================================
// Storage::apply
// =============================================================

#[test]
fn set_matrix_inserts_and_reports_object() {
    let mut storage = Storage::default();
    let m = Mat4::from_translation(Vec3::X);
    let change = storage.apply(&StorageOp::SetMatrix { name: "box".into(), matrix: m });
    assert_eq!(change, Some(Change::Object("box".into())));
    assert_eq!(storage.objects["box"], m);
}

#[test]
fn set_matrix_last_write_wins() {
    let mut storage = Storage::default();
    storage.apply(&StorageOp::SetMatrix { name: "box".into(), matrix: Mat4::IDENTITY });
    let m = Mat4::from_scale(Vec3::splat(2.0));
    storage.apply(&StorageOp::SetMatrix { name: "box".into(), matrix: m });
    assert_eq!(storage.objects["box"], m);
    assert_eq!(storage.objects.len(), 1);
}

#[test]
fn set_matrix_equal_value_is_no_change() {
    let mut storage = Storage::default();
    storage.apply(&StorageOp::SetMatrix { name: "box".into(), matrix: Mat4::IDENTITY });
    assert!(
        storage
            .apply(&StorageOp::SetMatrix { name: "box".into(), matrix: Mat4::IDENTITY })
            .is_none()
    );
}

#[test]
fn add_annotation_appends_in_order() {
    let mut storage = Storage::default();
    let a = note("a", None);
    let b = note("b", Some("box"));
    storage.apply(&StorageOp::AddAnnotation { annotation: a.clone() });
    storage.apply(&StorageOp::AddAnnotation { annotation: b.clone() });
    assert_eq!(storage.annotations, vec![a, b]);
}

#[test]
fn add_annotation_duplicate_id_is_ignored() {
    let mut storage = Storage::default();
    let a = note("a", None);
    storage.apply(&StorageOp::AddAnnotation { annotation: a.clone() });
    assert!(storage.apply(&StorageOp::AddAnnotation { annotation: a }).is_none());
    assert_eq!(storage.annotations.len(), 1);
}

#[test]
fn remove_annotation_filters_by_id() {
    let mut storage = Storage::default();
    let a = note("hi", Some("box"));
    storage.apply(&StorageOp::AddAnnotation { annotation: a.clone() });
    let change = storage.apply(&StorageOp::RemoveAnnotation { id: a.id });
    assert_eq!(change, Some(Change::Annotations));
    assert!(storage.annotations.is_empty());
}

#[test]
fn remove_unknown_annotation_is_noop() {
    let mut storage = Storage::default();
    storage.apply(&StorageOp::AddAnnotation { annotation: note("keep", None) });
    assert!(storage.apply(&StorageOp::RemoveAnnotation { id: Uuid::new_v4() }).is_none());
    assert_eq!(storage.annotations.len(), 1);
}

#[test]
fn remove_before_add_resurrects_record() {
    let mut storage = Storage::default();
    let a = note("late", None);
    storage.apply(&StorageOp::RemoveAnnotation { id: a.id });
    storage.apply(&StorageOp::AddAnnotation { annotation: a.clone() });
    assert_eq!(storage.annotations, vec![a]);
}

#[test]
fn set_part_replaces_whole_record() {
    let mut storage = Storage::default();
    let part = PartParameters { width: 120.0, cut1: 30.0, cut2: 20.0, offset: 2.0 };
    assert_eq!(storage.apply(&StorageOp::SetPart { part }), Some(Change::Part));
    assert_eq!(storage.part, part);
}

// =============================================================
// Snapshot seeding
// =============================================================

#[test]
fn snapshot_keys_override_initial_storage() {
    let initial = Storage::default();
    let existing = Storage {
        part: PartParameters { width: 150.0, ..Default::default() },
        ..Default::default()
    };
    let mut snapshot = serde_json::to_value(&existing).unwrap();
    snapshot.as_object_mut().unwrap().remove("annotations");

    let merged = initial.merged_with_snapshot(&snapshot).unwrap();
    assert_eq!(merged.part.width, 150.0);
    assert!(merged.annotations.is_empty());
}

#[test]
fn snapshot_with_bad_shape_errors() {
    let initial = Storage::default();
    let snapshot = serde_json::json!({ "objects": "not a map" });
    assert!(initial.merged_with_snapshot(&snapshot).is_err());
}

#[test]
fn matrix_serializes_as_sixteen_components() {
    let op = StorageOp::SetMatrix { name: "box".into(), matrix: Mat4::IDENTITY };
    let json = serde_json::to_value(&op).unwrap();
    assert_eq!(json["op"], "set_matrix");
    assert_eq!(json["matrix"].as_array().map(Vec::len), Some(16));
}

// =============================================================
// Annotation scoping
// =============================================================

#[test]
fn annotations_split_by_parent() {
    let mut storage = Storage::default();
    storage.apply(&StorageOp::AddAnnotation { annotation: note("on box", Some("box")) });
    storage.apply(&StorageOp::AddAnnotation { annotation: note("on sphere", Some("sphere")) });
    storage.apply(&StorageOp::AddAnnotation { annotation: note("floating", None) });

    let on_box: Vec<_> = storage.annotations_for("box").map(|a| a.text.as_str()).collect();
    let global: Vec<_> = storage.global_annotations().map(|a| a.text.as_str()).collect();
    assert_eq!(on_box, vec!["on box"]);
    assert_eq!(global, vec!["floating"]);
}
