#![allow(clippy::float_cmp)]

use std::sync::atomic::{AtomicUsize, Ordering};

use glam::Mat4;
use proptest::prelude::*;
use uuid::Uuid;

use super::*;
use crate::loopback::LoopbackHub;

// =============================================================
// Helpers
// =============================================================

async fn join(hub: &LoopbackHub, room: &str) -> SceneStore {
    SceneStore::enter(hub.connect(), RoomId::from(room), Storage::default())
        .await
        .unwrap()
}

fn moved(x: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut(&Snapshot<'_>) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move |_: &Snapshot<'_>| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

// =============================================================
// Lifecycle
// =============================================================

#[tokio::test]
async fn enter_seeds_initial_storage_for_new_room() {
    let hub = LoopbackHub::new();
    let store = join(&hub, "r").await;
    assert!(store.storage().objects.is_empty());
    assert_eq!(store.part(), PartParameters::default());
    assert_eq!(store.presence().cursor, Vec3::ZERO);
}

#[tokio::test]
async fn late_joiner_sees_existing_durable_storage() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    a.set_matrix("box", moved(3.0));
    a.set_part(&PartialPart { width: Some(110.0), ..Default::default() });
    hub.deliver_all();

    let b = join(&hub, "r").await;
    assert_eq!(b.matrix("box"), Some(moved(3.0)));
    assert_eq!(b.part().width, 110.0);
}

#[tokio::test]
async fn leave_flushes_pending_writes() {
    let hub = LoopbackHub::new();
    let room = RoomId::from("r");
    let mut a = join(&hub, "r").await;
    let a_id = a.connection_id();
    a.set_matrix("box", moved(1.0));
    assert_eq!(hub.pending(a_id), 1);

    a.leave().await.unwrap();
    assert_eq!(hub.pending(a_id), 0);
    assert_eq!(hub.room_storage(&room).unwrap().objects["box"], moved(1.0));
}

#[tokio::test]
async fn leave_notifies_peers() {
    let hub = LoopbackHub::new();
    let a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;
    b.pump();
    assert_eq!(b.others().len(), 1);

    a.leave().await.unwrap();
    let applied = b.pump();
    assert!(applied.iter().any(|x| matches!(x, Applied::PeerLeft(_))));
    assert!(b.others().is_empty());
}

// =============================================================
// Storage writes
// =============================================================

#[tokio::test]
async fn set_matrix_applies_locally_before_delivery() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    a.set_matrix("box", moved(2.0));
    assert_eq!(a.matrix("box"), Some(moved(2.0)));
    assert_eq!(hub.pending(a.connection_id()), 1);
}

#[tokio::test]
async fn set_matrix_reaches_peer_after_delivery() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;

    a.set_matrix("box", moved(5.0));
    assert_eq!(b.matrix("box"), None);

    hub.deliver_all();
    b.pump();
    assert_eq!(b.matrix("box"), Some(moved(5.0)));
}

#[tokio::test]
async fn concurrent_writes_converge_on_last_delivered() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;

    a.set_matrix("box", moved(1.0));
    b.set_matrix("box", moved(2.0));

    hub.deliver_next(b.connection_id());
    hub.deliver_next(a.connection_id());
    a.pump();
    b.pump();

    assert_eq!(a.matrix("box"), Some(moved(1.0)));
    assert_eq!(b.matrix("box"), Some(moved(1.0)));
}

#[tokio::test]
async fn add_then_remove_annotation() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let id = Uuid::new_v4();

    a.add_annotation(id, Vec3::ONE, "hi", Some("box"));
    assert_eq!(a.annotations().len(), 1);
    assert_eq!(a.annotations()[0].parent.as_deref(), Some("box"));

    a.remove_annotation(id);
    assert!(a.annotations().iter().all(|x| x.id != id));
}

#[tokio::test]
async fn remove_unknown_annotation_is_not_broadcast() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    a.remove_annotation(Uuid::new_v4());
    assert_eq!(hub.pending(a.connection_id()), 0);
    assert!(a.annotations().is_empty());
}

#[tokio::test]
async fn annotations_replicate_to_peer() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;
    let id = Uuid::new_v4();

    a.add_annotation(id, Vec3::X, "note", None);
    hub.deliver_all();
    b.pump();
    assert_eq!(b.annotations().len(), 1);

    b.remove_annotation(id);
    hub.deliver_all();
    a.pump();
    assert!(a.annotations().is_empty());
}

#[tokio::test]
async fn remote_remove_before_add_resurrects() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let peer = ConnectionId::new();
    let annotation = Annotation { id: Uuid::new_v4(), position: Vec3::ZERO, text: "x".into(), parent: None };

    a.apply_remote(RemoteEvent::Storage { origin: peer, op: StorageOp::RemoveAnnotation { id: annotation.id } });
    a.apply_remote(RemoteEvent::Storage { origin: peer, op: StorageOp::AddAnnotation { annotation: annotation.clone() } });
    assert_eq!(a.annotations(), &[annotation]);
}

#[tokio::test]
async fn set_part_merges_fields_and_replicates_whole_record() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;

    a.set_part(&PartialPart { width: Some(110.0), ..Default::default() });
    b.set_part(&PartialPart { cut1: Some(30.0), ..Default::default() });
    assert_eq!(a.part().width, 110.0);
    assert_eq!(b.part().cut1, 30.0);

    hub.deliver_next(a.connection_id());
    hub.deliver_next(b.connection_id());
    a.pump();
    b.pump();

    // Whole-record LWW: b's record (width 100, cut1 30) was delivered last.
    assert_eq!(a.part(), b.part());
    assert_eq!(a.part().width, 100.0);
    assert_eq!(a.part().cut1, 30.0);
}

// =============================================================
// Presence
// =============================================================

#[tokio::test]
async fn cursor_reaches_peers_immediately() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;

    a.set_cursor(Vec3::new(1.0, 2.0, 3.0));
    b.pump();
    assert_eq!(b.others()[&a.connection_id()].cursor, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(a.presence().cursor, Vec3::new(1.0, 2.0, 3.0));
}

#[tokio::test]
async fn own_presence_is_not_in_others() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let own = a.connection_id();
    let applied = a.apply_remote(RemoteEvent::Presence { connection: own, presence: Presence::default() });
    assert!(applied.is_none());
    assert!(a.others().is_empty());
}

#[tokio::test]
async fn last_cursor_value_wins() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;

    a.set_cursor(Vec3::X);
    a.set_cursor(Vec3::Y);
    b.pump();
    assert_eq!(b.others()[&a.connection_id()].cursor, Vec3::Y);
}

#[tokio::test]
async fn reconnect_resets_presence() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    a.set_cursor(Vec3::splat(9.0));
    a.leave().await.unwrap();

    let mut b = join(&hub, "r").await;
    let a2 = join(&hub, "r").await;
    b.pump();
    assert_eq!(b.others()[&a2.connection_id()].cursor, Vec3::ZERO);
    assert_eq!(a2.presence().cursor, Vec3::ZERO);
}

// =============================================================
// Partition
// =============================================================

#[tokio::test]
async fn partitioned_writes_stay_local_and_buffered() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;
    hub.set_partitioned(a.connection_id(), true);

    a.set_matrix("box", moved(4.0));
    a.add_annotation(Uuid::new_v4(), Vec3::ZERO, "offline", None);
    assert_eq!(a.matrix("box"), Some(moved(4.0)));
    assert_eq!(a.annotations().len(), 1);

    assert_eq!(hub.deliver_all(), 0);
    b.pump();
    assert_eq!(b.matrix("box"), None);

    hub.set_partitioned(a.connection_id(), false);
    hub.deliver_all();
    b.pump();
    assert_eq!(b.matrix("box"), Some(moved(4.0)));
    assert_eq!(b.annotations().len(), 1);
}

#[tokio::test]
async fn leave_during_partition_reports_error_and_still_leaves() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;
    b.pump();
    let a_id = a.connection_id();
    assert!(b.others().contains_key(&a_id));

    hub.set_partitioned(a_id, true);
    a.set_matrix("box", moved(1.0));
    assert_eq!(a.leave().await.unwrap_err(), ReplicationError::NetworkPartition);

    hub.set_partitioned(a_id, false);
    hub.deliver_all();
    let applied = b.pump();
    assert!(applied.iter().any(|x| matches!(x, Applied::PeerLeft(id) if *id == a_id)));
    assert!(!b.others().contains_key(&a_id));
}

// =============================================================
// Subscriptions
// =============================================================

#[tokio::test]
async fn subscribers_fire_only_for_their_slice() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let (objects, on_objects) = counter();
    let (notes, on_notes) = counter();
    a.subscribe(Slice::Objects, on_objects);
    a.subscribe(Slice::Annotations, on_notes);

    a.set_matrix("box", moved(1.0));
    assert_eq!(objects.load(Ordering::SeqCst), 1);
    assert_eq!(notes.load(Ordering::SeqCst), 0);

    a.add_annotation(Uuid::new_v4(), Vec3::ZERO, "n", None);
    assert_eq!(objects.load(Ordering::SeqCst), 1);
    assert_eq!(notes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscribers_fire_on_remote_change_only_when_changed() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let mut b = join(&hub, "r").await;
    let (count, on_objects) = counter();
    b.subscribe(Slice::Objects, on_objects);

    a.set_matrix("box", moved(1.0));
    hub.deliver_all();
    b.pump();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Echo of an identical value changes nothing.
    b.apply_remote(RemoteEvent::Storage {
        origin: a.connection_id(),
        op: StorageOp::SetMatrix { name: "box".into(), matrix: moved(1.0) },
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsubscribe_stops_notifications() {
    let hub = LoopbackHub::new();
    let mut a = join(&hub, "r").await;
    let (count, on_part) = counter();
    let id = a.subscribe(Slice::Part, on_part);
    assert!(a.unsubscribe(id));
    assert!(!a.unsubscribe(id));

    a.set_part(&PartialPart { offset: Some(2.0), ..Default::default() });
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

// =============================================================
// Convergence under arbitrary delivery interleavings
// =============================================================

proptest! {
    #[test]
    fn replicas_converge_on_last_delivered_write(
        writes in proptest::collection::vec((any::<bool>(), -100.0f32..100.0), 1..12),
        order in proptest::collection::vec(any::<bool>(), 0..24),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let hub = LoopbackHub::new();
            let mut a = join(&hub, "prop").await;
            let mut b = join(&hub, "prop").await;

            for (on_a, x) in &writes {
                if *on_a { a.set_matrix("box", moved(*x)) } else { b.set_matrix("box", moved(*x)) }
            }

            let mut last = None;
            for pick_a in order {
                let id = if pick_a { a.connection_id() } else { b.connection_id() };
                if let Some(op) = hub.deliver_next(id) {
                    last = Some(op);
                }
                // Interleave partial draining with delivery.
                a.pump();
            }
            while let Some(op) = hub.deliver_next(a.connection_id()).or_else(|| hub.deliver_next(b.connection_id())) {
                last = Some(op);
            }
            a.pump();
            b.pump();

            let Some(StorageOp::SetMatrix { matrix, .. }) = last else {
                panic!("at least one write was delivered");
            };
            prop_assert_eq!(a.matrix("box"), Some(matrix));
            prop_assert_eq!(b.matrix("box"), Some(matrix));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
