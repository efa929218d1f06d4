mod common;

use common::{micros, now, seed_readings, READINGS};
use policyflow::memory::MemoryCatalog;
use policyflow::partitions::{PartitionCatalog, RelationName};
use policyflow::policy::window_boundary;
use policyflow::time::{Interval, Lag, PartitionKeyType};

async fn open_dim(catalog: &MemoryCatalog, id: i32) -> policyflow::partitions::Dimension {
    let ht = catalog.get_hypertable(id).await.unwrap().unwrap();
    catalog.get_open_dimension(&ht).await.unwrap()
}

#[tokio::test]
async fn integer_boundary_is_integer_now_minus_lag() {
    let catalog = MemoryCatalog::new();
    seed_readings(&catalog, Some(1_000));
    let dim = open_dim(&catalog, READINGS).await;

    let b = window_boundary(&catalog, &dim, Lag::Integer(100), now())
        .await
        .unwrap();
    assert_eq!(b.value, 900);
    assert_eq!(b.key_type, PartitionKeyType::BigInt);
    assert_eq!(b.to_string(), "900");
}

#[tokio::test]
async fn integer_boundary_may_be_negative() {
    let catalog = MemoryCatalog::new();
    seed_readings(&catalog, Some(5));
    let dim = open_dim(&catalog, READINGS).await;

    let b = window_boundary(&catalog, &dim, Lag::Integer(10), now())
        .await
        .unwrap();
    assert_eq!(b.value, -5);
}

#[tokio::test]
async fn integer_boundary_tracks_integer_now() {
    let catalog = MemoryCatalog::new();
    seed_readings(&catalog, Some(1_000));
    let dim = open_dim(&catalog, READINGS).await;

    catalog.advance_integer_now(READINGS, 2_000);
    let b = window_boundary(&catalog, &dim, Lag::Integer(100), now())
        .await
        .unwrap();
    assert_eq!(b.value, 1_900);
}

#[tokio::test]
async fn integer_dimension_without_integer_now_is_a_config_error() {
    let catalog = MemoryCatalog::new();
    seed_readings(&catalog, None);
    let dim = open_dim(&catalog, READINGS).await;

    let err = window_boundary(&catalog, &dim, Lag::Integer(10), now())
        .await
        .unwrap_err();
    assert!(err.is_config(), "{err:?}");
    assert!(err.to_string().contains("integer_now"));
}

#[tokio::test]
async fn lag_kind_must_match_key_type() {
    let catalog = MemoryCatalog::new();
    seed_readings(&catalog, Some(1_000));
    catalog.add_hypertable(
        1,
        RelationName::new("public", "conditions"),
        PartitionKeyType::TimestampTz,
    );

    let int_dim = open_dim(&catalog, READINGS).await;
    let err = window_boundary(&catalog, &int_dim, Lag::Interval(Interval::days(1)), now())
        .await
        .unwrap_err();
    assert!(err.is_config());

    let time_dim = open_dim(&catalog, 1).await;
    let err = window_boundary(&catalog, &time_dim, Lag::Integer(1), now())
        .await
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn time_boundary_subtracts_the_interval() {
    let catalog = MemoryCatalog::new();
    catalog.add_hypertable(
        1,
        RelationName::new("public", "conditions"),
        PartitionKeyType::TimestampTz,
    );
    let dim = open_dim(&catalog, 1).await;

    let b = window_boundary(&catalog, &dim, Lag::Interval(Interval::days(7)), now())
        .await
        .unwrap();
    assert_eq!(b.value, micros("2024-05-25T00:00:00Z"));
    assert_eq!(b.as_datetime(), Some(common::ts("2024-05-25T00:00:00Z")));

    let month = Interval::parse("1 month").unwrap();
    let b = window_boundary(&catalog, &dim, Lag::Interval(month), now())
        .await
        .unwrap();
    assert_eq!(b.value, micros("2024-05-01T00:00:00Z"));
}

#[tokio::test]
async fn date_boundary_is_truncated_to_midnight() {
    let catalog = MemoryCatalog::new();
    catalog.add_hypertable(
        3,
        RelationName::new("public", "daily_totals"),
        PartitionKeyType::Date,
    );
    let dim = open_dim(&catalog, 3).await;

    let lag = Interval::parse("1 day 6 hours").unwrap();
    let b = window_boundary(&catalog, &dim, Lag::Interval(lag), now())
        .await
        .unwrap();
    // 2024-05-30T18:00 truncates to the start of 2024-05-30
    assert_eq!(b.value, micros("2024-05-30T00:00:00Z"));
    assert_eq!(b.to_string(), "2024-05-30");
}
