use chrono::Utc;
use dlgate::aggregate::{DownloadTotals, aggregate};
use dlgate::store::{DownloadStore, RecordKind};
use test_utils::{blob, counted, entry, memory_store};

#[tokio::test]
async fn first_entry_per_record_counts() {
    let store = memory_store().await;
    store
        .put_blob(1, RecordKind::Log, r#"[{"file":"x.zip","counter":3}]"#)
        .await
        .unwrap();
    store
        .put_blob(2, RecordKind::Log, r#"[{"file":"x.zip"},{"file":"x.zip"}]"#)
        .await
        .unwrap();

    let totals = aggregate(store.as_ref(), "x.zip", None, true).await;
    assert_eq!(totals, DownloadTotals { total: 4, unique: 2 });
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let store = memory_store().await;
    let now = Utc::now();
    store
        .put_blob(1, RecordKind::Log, r#"[{"file":"x.zip","counter":"#)
        .await
        .unwrap();
    store
        .put_blob(2, RecordKind::Log, "a:1:{s:4:\"file\";s:5:\"x.zip\";}")
        .await
        .unwrap();
    store
        .put_blob(3, RecordKind::Log, &blob(&[counted("x.zip", 2, 1, now)]))
        .await
        .unwrap();

    let totals = aggregate(store.as_ref(), "x.zip", None, true).await;
    assert_eq!(totals, DownloadTotals { total: 2, unique: 1 });
}

#[tokio::test]
async fn substring_matches_are_not_counted() {
    let store = memory_store().await;
    let now = Utc::now();
    store
        .put_blob(1, RecordKind::Log, &blob(&[entry("x.zip.bak", 1, now)]))
        .await
        .unwrap();
    store
        .put_blob(2, RecordKind::Log, &blob(&[entry("dir/x.zip", 1, now)]))
        .await
        .unwrap();

    let totals = aggregate(store.as_ref(), "x.zip", None, true).await;
    assert_eq!(totals, DownloadTotals::default());
}

#[tokio::test]
async fn archive_and_identity_filters() {
    let store = memory_store().await;
    let now = Utc::now();
    store
        .put_blob(1, RecordKind::Log, &blob(&[counted("x.zip", 2, 1, now)]))
        .await
        .unwrap();
    store
        .put_blob(1, RecordKind::Archive, &blob(&[counted("x.zip", 5, 400, now)]))
        .await
        .unwrap();
    store
        .put_blob(2, RecordKind::Log, &blob(&[entry("x.zip", 1, now)]))
        .await
        .unwrap();

    let everything = aggregate(store.as_ref(), "x.zip", None, true).await;
    assert_eq!(everything, DownloadTotals { total: 8, unique: 3 });

    let logs_only = aggregate(store.as_ref(), "x.zip", None, false).await;
    assert_eq!(logs_only, DownloadTotals { total: 3, unique: 2 });

    let member_one = aggregate(store.as_ref(), "x.zip", Some(1), true).await;
    assert_eq!(member_one, DownloadTotals { total: 7, unique: 2 });
}

#[tokio::test]
async fn empty_or_unknown_file_is_zero() {
    let store = memory_store().await;
    store
        .put_blob(1, RecordKind::Log, r#"[{"file":""}]"#)
        .await
        .unwrap();
    assert_eq!(
        aggregate(store.as_ref(), "", None, true).await,
        DownloadTotals::default()
    );
    assert_eq!(
        aggregate(store.as_ref(), "missing.zip", None, true).await,
        DownloadTotals::default()
    );
}

#[tokio::test]
async fn escaped_file_names_are_found() {
    let store = memory_store().await;
    store
        .put_blob(71, RecordKind::Log, r#"[{"file":"media\/a.zip","counter":3}]"#)
        .await
        .unwrap();
    store
        .put_blob(72, RecordKind::Log, r#"[{"file":"caf\u00e9.zip"}]"#)
        .await
        .unwrap();

    let totals = aggregate(store.as_ref(), "media/a.zip", None, true).await;
    assert_eq!(totals, DownloadTotals { total: 3, unique: 1 });
    let totals = aggregate(store.as_ref(), "café.zip", None, true).await;
    assert_eq!(totals, DownloadTotals { total: 1, unique: 1 });
}

#[tokio::test]
async fn bad_entries_do_not_hide_good_ones() {
    let store = memory_store().await;
    store
        .put_blob(
            1,
            RecordKind::Log,
            r#"[{"file":{"name":"x.zip"}},{"file":"x.zip","counter":"2"}]"#,
        )
        .await
        .unwrap();

    let totals = aggregate(store.as_ref(), "x.zip", None, true).await;
    assert_eq!(totals, DownloadTotals { total: 2, unique: 1 });
}
