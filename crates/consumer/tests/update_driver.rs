//! Update-driver behavior against real blob files.

use parking_lot::Mutex;
use shale_consumer::{
    ConsumerConfig, DoubleSnapshotConfig, ObjectLongevityConfig, ReadApi, RefreshListener,
    ShaleConsumer, SharedStateEngine, TransitionBlob, UpdatePlan, VERSION_NONE,
};
use shale_core::{
    FieldType, ListSchema, ObjectField, ObjectSchema, Schema, ShaleError, ShaleResult,
};
use shale_engine::testing::{DeltaBuilder, FieldValue, ObjectTypeFixture, SnapshotBuilder};
use std::io::Write;
use std::sync::Arc;

fn write_blob(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn movie_schema() -> ObjectSchema {
    ObjectSchema::new(
        "Movie",
        vec![
            ObjectField::new("id", FieldType::Int),
            ObjectField::new("title", FieldType::String),
        ],
    )
}

fn movie_snapshot(destination_tag: u64) -> Vec<u8> {
    SnapshotBuilder::new()
        .destination_tag(destination_tag)
        .object_type(
            ObjectTypeFixture::new(movie_schema(), 1)
                .record(0, vec![FieldValue::Int(Some(1)), FieldValue::Str(Some("A".into()))])
                .record(1, vec![FieldValue::Int(Some(2)), FieldValue::Str(Some("BB".into()))]),
        )
        .build()
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl RefreshListener for RecordingListener {
    fn blob_loaded(&self, blob: &TransitionBlob) -> ShaleResult<()> {
        self.events.lock().push(format!("blob_loaded:{}", blob.to_version));
        Ok(())
    }

    fn snapshot_applied(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        to_version: u64,
    ) -> ShaleResult<()> {
        self.events.lock().push(format!("snapshot_applied:{to_version}"));
        Ok(())
    }

    fn snapshot_update_occurred(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        destination_version: u64,
    ) -> ShaleResult<()> {
        self.events
            .lock()
            .push(format!("snapshot_update:{destination_version}"));
        Ok(())
    }

    fn delta_update_occurred(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        destination_version: u64,
    ) -> ShaleResult<()> {
        self.events
            .lock()
            .push(format!("delta_update:{destination_version}"));
        Ok(())
    }
}

struct FailingListener;

impl RefreshListener for FailingListener {
    fn snapshot_update_occurred(
        &self,
        _api: &Arc<ReadApi>,
        _engine: &SharedStateEngine,
        _destination_version: u64,
    ) -> ShaleResult<()> {
        Err(ShaleError::ListenerFailure {
            reason: "index rebuild exploded".into(),
        })
    }
}

#[test]
fn empty_snapshot_plan_sets_version_and_notifies_once() {
    let blob = write_blob(&SnapshotBuilder::new().destination_tag(0xDEAD_BEEF).build());
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    let listener = Arc::new(RecordingListener::default());
    consumer.register_listener(listener.clone());

    assert_eq!(consumer.current_version(), VERSION_NONE);
    let plan = UpdatePlan::snapshot_plan(TransitionBlob::snapshot(blob.path(), 1), vec![], 1);
    consumer.update(&plan).unwrap();

    assert_eq!(consumer.current_version(), 1);
    assert!(consumer.read_api().is_some());
    assert_eq!(
        consumer.state_engine().read().randomized_tag(),
        0xDEAD_BEEF
    );
    assert_eq!(
        listener.events(),
        vec!["blob_loaded:1", "snapshot_applied:1", "snapshot_update:1"]
    );
}

#[test]
fn snapshot_data_reads_through_the_api() {
    let blob = write_blob(&movie_snapshot(0xAA));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    let plan = UpdatePlan::snapshot_plan(TransitionBlob::snapshot(blob.path(), 1), vec![], 1);
    consumer.update(&plan).unwrap();

    let api = consumer.read_api().unwrap();
    let engine = api.engine();
    let guard = engine.read();
    let state = guard.type_state("Movie").unwrap();
    assert_eq!(state.populated_ordinals(), vec![0, 1]);
    assert_eq!(
        state.as_object().unwrap().read_string(1, 1).unwrap(),
        Some("BB".to_string())
    );
}

#[test]
fn double_snapshot_gate_rejects_known_failures_before_io() {
    let consumer = ShaleConsumer::new(ConsumerConfig {
        double_snapshot: DoubleSnapshotConfig { allow: true },
        ..ConsumerConfig::default()
    });

    // Points at a file that does not exist: the gate must fire before any
    // attempt to open it.
    let bad = TransitionBlob::snapshot("/nonexistent/blob", 9);
    consumer.failed_transitions().mark_failed(&bad);

    let plan = UpdatePlan::snapshot_plan(bad, vec![], 9);
    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(
        err,
        ShaleError::KnownFailingTransition { version: 9 }
    ));
    assert_eq!(consumer.current_version(), VERSION_NONE);
}

#[test]
fn gate_disabled_attempts_the_plan() {
    let consumer = ShaleConsumer::new(ConsumerConfig {
        double_snapshot: DoubleSnapshotConfig { allow: false },
        ..ConsumerConfig::default()
    });
    let bad = TransitionBlob::snapshot("/nonexistent/blob", 9);
    consumer.failed_transitions().mark_failed(&bad);

    let plan = UpdatePlan::snapshot_plan(bad, vec![], 9);
    // With the gate off the plan is attempted and fails on I/O instead.
    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(err, ShaleError::Io(_)));
}

#[test]
fn wrong_origin_delta_marks_blob_and_leaves_engine_intact() {
    let snapshot = write_blob(&movie_snapshot(0xAA));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    let plan = UpdatePlan::snapshot_plan(TransitionBlob::snapshot(snapshot.path(), 1), vec![], 1);
    consumer.update(&plan).unwrap();

    let delta = write_blob(&DeltaBuilder::new(0xBB).destination_tag(0xCC).build());
    let delta_blob = TransitionBlob::delta(delta.path(), 1, 2);
    let delta_plan = UpdatePlan::delta_plan(vec![delta_blob.clone()], 2);

    let err = consumer.update(&delta_plan).unwrap_err();
    assert!(matches!(
        err,
        ShaleError::WrongOrigin {
            expected: 0xAA,
            actual: 0xBB
        }
    ));
    // Engine unchanged, version unchanged, only the delta marked failed.
    assert_eq!(consumer.current_version(), 1);
    assert_eq!(consumer.state_engine().read().randomized_tag(), 0xAA);
    assert!(!consumer.state_engine().read().is_poisoned());
    assert!(consumer.failed_transitions().is_failed(&delta_blob));
    assert_eq!(consumer.failed_transitions().len(), 1);
}

#[test]
fn discard_only_delta_advances_version_and_tag_chain() {
    let snapshot = write_blob(&movie_snapshot(0xDEAD_BEEF));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    let listener = Arc::new(RecordingListener::default());
    consumer.register_listener(listener.clone());

    let plan = UpdatePlan::snapshot_plan(TransitionBlob::snapshot(snapshot.path(), 1), vec![], 1);
    consumer.update(&plan).unwrap();

    let unknown = Schema::List(ListSchema::new("ListOfJunk", "Junk"));
    let delta = write_blob(
        &DeltaBuilder::new(0xDEAD_BEEF)
            .destination_tag(0xFEED_FACE)
            .opaque_type(&unknown, 1, &[b"payload"])
            .build(),
    );
    let delta_plan = UpdatePlan::delta_plan(vec![TransitionBlob::delta(delta.path(), 1, 2)], 2);
    consumer.update(&delta_plan).unwrap();

    assert_eq!(consumer.current_version(), 2);
    assert_eq!(
        consumer.state_engine().read().randomized_tag(),
        0xFEED_FACE
    );
    assert!(listener.events().contains(&"delta_update:2".to_string()));
    assert!(consumer.failed_transitions().is_empty());
}

#[test]
fn listener_failure_fails_the_plan_and_marks_all_blobs() {
    let blob = write_blob(&movie_snapshot(0xAA));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    consumer.register_listener(Arc::new(FailingListener));

    let snapshot_blob = TransitionBlob::snapshot(blob.path(), 1);
    let plan = UpdatePlan::snapshot_plan(snapshot_blob.clone(), vec![], 1);

    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(err, ShaleError::ListenerFailure { .. }));
    assert!(consumer.failed_transitions().is_failed(&snapshot_blob));
}

#[test]
fn corrupt_snapshot_leaves_version_unchanged() {
    let bytes = movie_snapshot(0xAA);
    let blob = write_blob(&bytes[..bytes.len() - 6]);
    let consumer = ShaleConsumer::new(ConsumerConfig::default());

    let snapshot_blob = TransitionBlob::snapshot(blob.path(), 1);
    let plan = UpdatePlan::snapshot_plan(snapshot_blob.clone(), vec![], 1);

    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    // The failure hit a fresh engine; the live generation never changed.
    assert_eq!(consumer.current_version(), VERSION_NONE);
    assert!(!consumer.state_engine().read().is_poisoned());
    assert!(consumer.failed_transitions().is_failed(&snapshot_blob));
}

#[test]
fn generations_hand_off_and_stale_handles_are_counted() {
    let first = write_blob(&movie_snapshot(0xA1));
    let second = write_blob(&movie_snapshot(0xA2));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());

    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(first.path(), 1),
            vec![],
            1,
        ))
        .unwrap();
    let api_v1 = consumer.read_api().unwrap();
    assert_eq!(api_v1.generation(), 1);

    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(second.path(), 2),
            vec![],
            2,
        ))
        .unwrap();
    let api_v2 = consumer.read_api().unwrap();
    assert_eq!(api_v2.generation(), 2);
    assert!(!Arc::ptr_eq(&api_v1, &api_v2));

    // api_v1 is superseded but still strongly held.
    assert_eq!(consumer.stale_reference_detector().stale_handle_count(), 1);
    drop(api_v1);
    assert_eq!(consumer.stale_reference_detector().stale_handle_count(), 0);
}

#[test]
fn longevity_proxy_pins_the_historical_chain() {
    let first = write_blob(&movie_snapshot(0xB1));
    let second = write_blob(&movie_snapshot(0xB2));
    let consumer = ShaleConsumer::new(ConsumerConfig {
        object_longevity: ObjectLongevityConfig {
            enable_long_lived_object_support: true,
        },
        ..ConsumerConfig::default()
    });

    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(first.path(), 1),
            vec![],
            1,
        ))
        .unwrap();
    let api_v1 = consumer.read_api().unwrap();
    assert!(api_v1.is_long_lived());
    assert!(consumer.historical_access().is_none());

    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(second.path(), 2),
            vec![],
            2,
        ))
        .unwrap();

    // The superseded generation's proxy pins the historical link.
    let historical = consumer.historical_access().unwrap();
    assert_eq!(historical.version(), 1);
    assert!(historical.next().is_none());
    assert!(Arc::ptr_eq(
        &api_v1.proxy().unwrap().historical().unwrap(),
        &historical
    ));

    // Dropping the last old handle lets the chain link unwind.
    drop(historical);
    drop(api_v1);
    assert!(consumer.historical_access().is_none());
}

#[test]
fn poisoned_engine_refuses_deltas_until_resnapshot() {
    let snapshot = write_blob(&movie_snapshot(0xAA));
    let consumer = ShaleConsumer::new(ConsumerConfig::default());
    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(snapshot.path(), 1),
            vec![],
            1,
        ))
        .unwrap();

    // A delta touching the populated Movie type fails mid-walk, after the
    // tag swap: the live engine is poisoned.
    let delta = write_blob(
        &DeltaBuilder::new(0xAA)
            .opaque_type(&Schema::Object(movie_schema()), 1, &[b""])
            .build(),
    );
    let err = consumer
        .update(&UpdatePlan::delta_plan(
            vec![TransitionBlob::delta(delta.path(), 1, 2)],
            2,
        ))
        .unwrap_err();
    assert!(matches!(err, ShaleError::DeltaUnsupported { .. }));
    assert!(consumer.state_engine().read().is_poisoned());

    // Further deltas are refused outright.
    let another = write_blob(&DeltaBuilder::new(0xAB).build());
    let err = consumer
        .update(&UpdatePlan::delta_plan(
            vec![TransitionBlob::delta(another.path(), 2, 3)],
            3,
        ))
        .unwrap_err();
    assert!(matches!(err, ShaleError::EnginePoisoned));

    // A fresh snapshot replaces the poisoned engine wholesale.
    let recovery = write_blob(&movie_snapshot(0xCC));
    consumer
        .update(&UpdatePlan::snapshot_plan(
            TransitionBlob::snapshot(recovery.path(), 4),
            vec![],
            4,
        ))
        .unwrap();
    assert_eq!(consumer.current_version(), 4);
    assert!(!consumer.state_engine().read().is_poisoned());
}

#[test]
fn snapshot_plan_with_failing_delta_marks_every_blob() {
    let snapshot = write_blob(&movie_snapshot(0xAA));
    // Delta originates from a different tag, so it fails after the
    // snapshot succeeded.
    let delta = write_blob(&DeltaBuilder::new(0xEE).build());
    let consumer = ShaleConsumer::new(ConsumerConfig::default());

    let snapshot_blob = TransitionBlob::snapshot(snapshot.path(), 1);
    let delta_blob = TransitionBlob::delta(delta.path(), 1, 2);
    let plan = UpdatePlan::snapshot_plan(snapshot_blob.clone(), vec![delta_blob.clone()], 2);

    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(err, ShaleError::WrongOrigin { .. }));
    // Snapshot-plan failure scope: every blob in the plan.
    assert!(consumer.failed_transitions().is_failed(&snapshot_blob));
    assert!(consumer.failed_transitions().is_failed(&delta_blob));

    // Retrying the same plan now trips the double-snapshot gate.
    let err = consumer.update(&plan).unwrap_err();
    assert!(matches!(err, ShaleError::KnownFailingTransition { .. }));
}
