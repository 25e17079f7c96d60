use foundation_provider::conformance::run_conformance_suite;
use foundation_provider::MemoryProvider;

#[tokio::test]
async fn memory_provider_conforms() {
    let report = run_conformance_suite(|| async { MemoryProvider::new() }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total >= 18);
}

#[tokio::test]
async fn persisted_memory_provider_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let counter = std::sync::atomic::AtomicUsize::new(0);
    let report = run_conformance_suite(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = dir.path().join(format!("control-plane-{}.json", n));
        async move { MemoryProvider::open(&path, None).unwrap() }
    })
    .await;
    assert_eq!(report.failed, 0, "{report}");
}

#[tokio::test]
async fn persisted_state_survives_reopen() {
    use foundation_provider::CloudProvider;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let first = MemoryProvider::open(&path, None).unwrap();
    let org = first.create_organization().await.unwrap();
    first
        .create_organizational_unit(&org.root_id, "Workloads")
        .await
        .unwrap();
    drop(first);

    let second = MemoryProvider::open(&path, None).unwrap();
    let found = second.describe_organization().await.unwrap().unwrap();
    assert_eq!(found, org);
    let units = second.list_organizational_units(&org.root_id).await.unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name, "Workloads");
}
