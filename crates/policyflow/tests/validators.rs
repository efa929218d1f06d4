mod common;

use common::{
    conditions, conditions_daily, conditions_time_idx, fixture, micros, now, seed_conditions,
    seed_readings, CONDITIONS, CONDITIONS_DAILY_MAT, READINGS_MAT,
};
use policyflow::error::PolicyError;
use policyflow::partitions::RelationName;
use policyflow::policy::{self, PolicyDescriptor, PolicyKind};
use policyflow::time::PartitionKeyType;
use serde_json::json;

fn config_parts(err: PolicyError) -> (String, Option<String>, Option<String>) {
    match err {
        PolicyError::Config {
            message,
            detail,
            hint,
        } => (message, detail, hint),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[tokio::test]
async fn reorder_requires_an_existing_hypertable() {
    let f = fixture();
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Reorder,
        Some(&json!({"hypertable_id": 42, "index_name": "conditions_time_idx"})),
        &services.context(now()),
    )
    .await
    .unwrap_err();

    let (message, _, _) = config_parts(err);
    assert_eq!(message, "configuration hypertable id 42 not found");
}

#[tokio::test]
async fn reorder_requires_an_existing_index() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Reorder,
        Some(&json!({"hypertable_id": CONDITIONS, "index_name": "no_such_idx"})),
        &services.context(now()),
    )
    .await
    .unwrap_err();

    let (message, detail, _) = config_parts(err);
    assert_eq!(message, "reorder index not found");
    assert!(detail.unwrap().contains("no_such_idx"));
}

#[tokio::test]
async fn reorder_index_must_belong_to_the_hypertable() {
    let f = fixture();
    seed_conditions(&f.catalog);
    f.catalog.add_index(
        RelationName::new("public", "devices_pkey"),
        RelationName::new("public", "devices"),
    );
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Reorder,
        Some(&json!({"hypertable_id": CONDITIONS, "index_name": "devices_pkey"})),
        &services.context(now()),
    )
    .await
    .unwrap_err();

    let (message, _, hint) = config_parts(err);
    assert_eq!(message, "invalid reorder index");
    assert!(hint.unwrap().contains("conditions"));
}

#[tokio::test]
async fn validation_is_idempotent() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();
    let cfg = json!({"hypertable_id": CONDITIONS, "index_name": "conditions_time_idx"});

    let first = policy::validate(PolicyKind::Reorder, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    let second = policy::validate(PolicyKind::Reorder, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    assert_eq!(first, second);

    let PolicyDescriptor::Reorder(reorder) = first else {
        panic!("expected a reorder descriptor");
    };
    assert_eq!(reorder.hypertable().relation, conditions());
    assert_eq!(reorder.index().index, conditions_time_idx());
}

#[tokio::test]
async fn missing_and_ill_typed_keys_name_the_key() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Retention,
        Some(&json!({"hypertable_id": CONDITIONS})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("drop_after"));

    let err = policy::validate(
        PolicyKind::Compression,
        Some(&json!({"hypertable_id": CONDITIONS, "compress_after": "seven days"})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("compress_after"));
}

#[tokio::test]
async fn compression_validation_releases_its_cache_pin() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();
    let cfg = json!({"hypertable_id": CONDITIONS, "compress_after": "7 days"});

    {
        let descriptor =
            policy::validate(PolicyKind::Compression, Some(&cfg), &services.context(now()))
                .await
                .unwrap();
        assert_eq!(services.cache.pinned(CONDITIONS), 1);
        drop(descriptor);
    }
    assert_eq!(services.cache.pinned(CONDITIONS), 0);

    // a failed validation releases it too
    let bad = json!({"hypertable_id": CONDITIONS, "compress_after": 7});
    assert!(
        policy::validate(PolicyKind::Compression, Some(&bad), &services.context(now()))
            .await
            .is_err()
    );
    assert_eq!(services.cache.total_pins(), 0);

    // and check_config never leaves one behind
    f.engine
        .check_config(&PolicyKind::Compression.routine(), &cfg, now())
        .await
        .unwrap();
    assert_eq!(services.cache.total_pins(), 0);
}

#[tokio::test]
async fn retention_on_a_materialization_targets_the_user_view() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();

    let descriptor = policy::validate(
        PolicyKind::Retention,
        Some(&json!({"hypertable_id": CONDITIONS_DAILY_MAT, "drop_after": "7 days"})),
        &services.context(now()),
    )
    .await
    .unwrap();
    let PolicyDescriptor::Retention(retention) = descriptor else {
        panic!("expected a retention descriptor");
    };
    assert_eq!(retention.target(), &conditions_daily());
    assert_eq!(retention.boundary().value, micros("2024-05-25T00:00:00Z"));
    assert_eq!(services.cache.total_pins(), 0);

    let descriptor = policy::validate(
        PolicyKind::Retention,
        Some(&json!({"hypertable_id": CONDITIONS, "drop_after": "7 days"})),
        &services.context(now()),
    )
    .await
    .unwrap();
    let PolicyDescriptor::Retention(retention) = descriptor else {
        panic!("expected a retention descriptor");
    };
    assert_eq!(retention.target(), &conditions());
}

#[tokio::test]
async fn retention_sees_hypertable_changes_between_runs() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();
    let cfg = json!({"hypertable_id": CONDITIONS, "drop_after": "7 days"});

    let first = policy::validate(PolicyKind::Retention, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    let PolicyDescriptor::Retention(first) = first else {
        panic!("expected a retention descriptor");
    };
    assert_eq!(first.target(), &conditions());

    f.catalog
        .rename_hypertable(CONDITIONS, RelationName::new("public", "renamed"));
    let second = policy::validate(PolicyKind::Retention, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    let PolicyDescriptor::Retention(second) = second else {
        panic!("expected a retention descriptor");
    };
    assert_eq!(second.target(), &RelationName::new("public", "renamed"));

    f.catalog.remove_hypertable(CONDITIONS);
    let err = policy::validate(PolicyKind::Retention, Some(&cfg), &services.context(now()))
        .await
        .unwrap_err();
    let (message, _, _) = config_parts(err);
    assert_eq!(message, "configuration hypertable id 1 not found");
    assert_eq!(services.cache.total_pins(), 0);
}

#[tokio::test]
async fn compression_pin_keeps_its_metadata_while_new_runs_reload() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();
    let cfg = json!({"hypertable_id": CONDITIONS, "compress_after": "7 days"});

    let held = policy::validate(PolicyKind::Compression, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    let PolicyDescriptor::Compression(held) = held else {
        panic!("expected a compression descriptor");
    };

    f.catalog
        .rename_hypertable(CONDITIONS, RelationName::new("public", "renamed"));
    let fresh = policy::validate(PolicyKind::Compression, Some(&cfg), &services.context(now()))
        .await
        .unwrap();
    let PolicyDescriptor::Compression(fresh) = fresh else {
        panic!("expected a compression descriptor");
    };

    assert_eq!(held.hypertable().hypertable().relation, conditions());
    assert_eq!(
        fresh.hypertable().hypertable().relation,
        RelationName::new("public", "renamed")
    );
    assert_eq!(services.cache.pinned(CONDITIONS), 2);

    drop(held);
    drop(fresh);
    assert_eq!(services.cache.pinned(CONDITIONS), 0);
    assert!(services.cache.get(CONDITIONS).is_none());
}

#[tokio::test]
async fn refresh_window_follows_the_integer_now_chain() {
    let f = fixture();
    seed_readings(&f.catalog, Some(1_000));
    let services = f.engine.services();

    let descriptor = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": READINGS_MAT, "start_offset": 100, "end_offset": 10})),
        &services.context(now()),
    )
    .await
    .unwrap();
    let PolicyDescriptor::Refresh(refresh) = descriptor else {
        panic!("expected a refresh descriptor");
    };
    let window = refresh.window();
    assert_eq!(window.key_type, PartitionKeyType::BigInt);
    assert_eq!((window.start, window.end), (900, 990));
    assert_eq!(refresh.continuous_agg().raw_hypertable_id, common::READINGS);
}

#[tokio::test]
async fn refresh_without_integer_now_anywhere_in_the_chain_fails() {
    let f = fixture();
    seed_readings(&f.catalog, None);
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": READINGS_MAT, "start_offset": 100, "end_offset": 10})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    let (message, _, _) = config_parts(err);
    assert!(
        message.starts_with("missing integer now function for hypertable"),
        "{message}"
    );
}

#[tokio::test]
async fn refresh_rejects_an_empty_or_inverted_window() {
    let f = fixture();
    seed_readings(&f.catalog, Some(1_000));
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": READINGS_MAT, "start_offset": 10, "end_offset": 100})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    let (message, detail, _) = config_parts(err);
    assert_eq!(message, "invalid refresh window");
    assert_eq!(detail.as_deref(), Some("start_offset: 990, end_offset: 900"));

    let err = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": READINGS_MAT, "start_offset": 10, "end_offset": 10})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    let (message, _, _) = config_parts(err);
    assert_eq!(message, "invalid refresh window");
}

#[tokio::test]
async fn refresh_null_offsets_are_unbounded() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();

    let descriptor = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({
            "mat_hypertable_id": CONDITIONS_DAILY_MAT,
            "start_offset": null,
            "end_offset": "1 hour"
        })),
        &services.context(now()),
    )
    .await
    .unwrap();
    let PolicyDescriptor::Refresh(refresh) = descriptor else {
        panic!("expected a refresh descriptor");
    };
    let window = refresh.window();
    assert_eq!(window.start, i64::MIN);
    assert_eq!(window.end, micros("2024-05-31T23:00:00Z"));
    assert_eq!(window.start_boundary().to_string(), "-infinity");
}

#[tokio::test]
async fn refresh_requires_a_continuous_aggregate() {
    let f = fixture();
    seed_conditions(&f.catalog);
    let services = f.engine.services();

    let err = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": CONDITIONS, "start_offset": "1 day", "end_offset": null})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    assert!(err.is_config());

    let err = policy::validate(
        PolicyKind::Refresh,
        Some(&json!({"mat_hypertable_id": 999, "start_offset": "1 day"})),
        &services.context(now()),
    )
    .await
    .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn check_config_skips_user_defined_actions() {
    let f = fixture();
    let routine = policyflow::jobs::RoutineName::new("public", "custom_vacuum");

    let kind = f
        .engine
        .check_config(&routine, &json!({"anything": true}), now())
        .await
        .unwrap();
    assert_eq!(kind, None);

    let kind = f
        .engine
        .check_config(
            &PolicyKind::Reorder.routine(),
            &json!({"hypertable_id": 1, "index_name": "x"}),
            now(),
        )
        .await;
    assert!(kind.unwrap_err().is_config());
}
