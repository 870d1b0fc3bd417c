mod support;

use std::sync::Arc;

use clone_apps::config::ExportConfig;
use clone_apps::pipeline::{self, ExportOptions, ImportOptions};
use clone_apps::snapshot::SnapshotStore;
use clone_apps::transfer::retry::RetryPolicy;
use clone_apps::transfer::{ArtifactClient, CancelToken, NullSink, TransferCoordinator, TransferOutcome};
use clone_apps::workspace::WorkspacePaths;
use serde_json::json;
use support::FakePlatform;

fn offline_transfers() -> TransferCoordinator {
    TransferCoordinator::new(
        ArtifactClient::new(reqwest::blocking::Client::new(), "http://127.0.0.1:9", "bearer tok"),
        RetryPolicy::default(),
        5,
        CancelToken::new(),
        Arc::new(NullSink),
    )
}

fn source_platform() -> FakePlatform {
    let api = FakePlatform::new();
    api.seed(
        "/v2/organizations",
        "o-1",
        json!({ "name": "acme", "spaces_url": "/v2/organizations/o-1/spaces" }),
    );
    api.seed(
        "/v2/spaces",
        "s-1",
        json!({ "name": "dev", "organization_guid": "o-1" }),
    );
    api.seed_doc(
        "/v2/spaces/s-1/summary",
        json!({
            "apps": [
                {
                    "guid": "a-1", "name": "web", "memory": 256, "instances": 1,
                    "disk_quota": 512, "state": "STARTED", "health_check_type": "port",
                    "urls": ["web.apps.example.com"]
                },
                {
                    "guid": "a-2", "name": "batch", "memory": 256, "instances": 1,
                    "disk_quota": 512, "state": "STOPPED", "health_check_type": "process"
                }
            ],
            "services": []
        }),
    );
    api
}

#[test]
fn export_then_import_with_restore() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = SnapshotStore::new(WorkspacePaths::new(tmp.path()));
    let transfers = offline_transfers();

    let exported = pipeline::export(
        &source_platform(),
        &transfers,
        &ExportConfig::default(),
        &store,
        &ExportOptions::default(),
    )
    .expect("export");
    assert_eq!((exported.orgs, exported.spaces, exported.apps), (1, 1, 2));
    assert!(exported.downloads.is_none());
    assert!(exported.is_ok());
    assert!(tmp.path().join("apps.json").is_file());

    let target = FakePlatform::new();
    target.seed("/v2/shared_domains", "d-1", json!({ "name": "apps.example.com" }));
    let summary = pipeline::import(
        &target,
        &transfers,
        &store,
        &ImportOptions {
            restore: true,
            ..ImportOptions::default()
        },
    )
    .expect("import");

    // No artifacts were downloaded, so every upload is skipped.
    assert_eq!(summary.uploads.results.len(), 4);
    assert!(
        summary
            .uploads
            .results
            .iter()
            .all(|r| matches!(r.outcome, TransferOutcome::Skipped { .. }))
    );
    let restore = summary.restore.as_ref().expect("restore report");
    assert_eq!(restore.started, vec!["acme/dev/web".to_string()]);
    assert_eq!(target.started(), vec!["app-1".to_string()]);
    assert!(summary.is_ok());

    let recorded = store.load_imported().expect("imported document");
    assert_eq!(recorded, summary.imported);
    assert_eq!(recorded[0].spaces[0].apps[0].src, "web_a-1.src");
    assert!(summary.render().contains("apps: found=0 created=2 failed=0 skipped=0"));
}

#[test]
fn import_without_snapshot_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = SnapshotStore::new(WorkspacePaths::new(tmp.path()));
    let res = pipeline::import(
        &FakePlatform::new(),
        &offline_transfers(),
        &store,
        &ImportOptions::default(),
    );
    assert!(res.is_err());
}
