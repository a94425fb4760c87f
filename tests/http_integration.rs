//! Integration tests for the Autonomous Data Warehouse synchronizer using wiremock
//!
//! These tests drive real HTTP requests through the lifecycle driver against
//! a mocked control plane, covering polling, partial updates, retries and
//! not-found handling.

use cloudsync::engine::{
    LifecycleDriver, LifecycleState, Operation, PollConfig, ResourceId, RetryPolicy, SyncError,
    Synchronizer, Timeouts,
};
use cloudsync::remote::ControlPlaneClient;
use cloudsync::resource::{AdwDeclared, AutonomousDataWarehouseSync, LicenseModel};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COLLECTION: &str = "/20160918/autonomousDataWarehouses";
const ADW_PATH: &str = "/20160918/autonomousDataWarehouses/ocid1.adw.1";

fn adw(state: &str, cpu: u32) -> Value {
    json!({
        "id": "ocid1.adw.1",
        "lifecycleState": state,
        "compartmentId": "ocid1.compartment.1",
        "dbName": "adwdb1",
        "displayName": "warehouse",
        "cpuCoreCount": cpu,
        "dataStorageSizeInTBs": 1,
        "licenseModel": "LICENSE_INCLUDED",
        "serviceConsoleUrl": "https://console.example.com/adw",
        "connectionStrings": {"high": "adw_high", "low": "adw_low", "medium": "adw_medium"},
        "timeCreated": "2018-09-01T10:00:00.000Z",
        "freeformTags": {"team": "data"}
    })
}

fn declared() -> AdwDeclared {
    AdwDeclared {
        admin_password: Some("Welcome1#Welcome1".to_string()),
        compartment_id: Some("ocid1.compartment.1".to_string()),
        cpu_core_count: Some(1),
        data_storage_size_in_tbs: Some(1),
        db_name: Some("adwdb1".to_string()),
        display_name: Some("warehouse".to_string()),
        license_model: Some(LicenseModel::LicenseIncluded),
        ..AdwDeclared::default()
    }
}

fn driver() -> LifecycleDriver {
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        use_jitter: false,
    };
    LifecycleDriver::new(
        retry,
        PollConfig::fixed(Duration::from_millis(10)),
        Timeouts::default(),
        CancellationToken::new(),
    )
}

fn sync_for(server: &MockServer) -> AutonomousDataWarehouseSync {
    let client = ControlPlaneClient::new(&server.uri(), Some("test-token".to_string())).unwrap();
    AutonomousDataWarehouseSync::new(client).unwrap()
}

fn existing(server: &MockServer) -> AutonomousDataWarehouseSync {
    sync_for(server).with_identity(ResourceId::new("ocid1.adw.1").unwrap())
}

/// Test module for create scenarios
mod create_tests {
    use super::*;

    /// Create posts once, then polls until AVAILABLE
    #[tokio::test]
    async fn test_create_polls_until_available() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COLLECTION))
            .and(bearer_token("test-token"))
            .and(header_exists("opc-retry-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("PROVISIONING", 1)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("PROVISIONING", 1)))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("AVAILABLE", 1)))
            .mount(&server)
            .await;

        let mut sync = sync_for(&server);
        let mut state = declared();
        let report = driver().create(&mut sync, &mut state).await.expect("create should succeed");

        assert_eq!(report.poll_iterations, 2);
        assert_eq!(state.id.as_ref().map(ResourceId::as_str), Some("ocid1.adw.1"));
        assert_eq!(state.state, Some(LifecycleState::new("AVAILABLE")));
        assert_eq!(
            state.connection_strings.as_ref().and_then(|c| c.high.as_deref()),
            Some("adw_high")
        );
        assert_eq!(state.admin_password.as_deref(), Some("Welcome1#Welcome1"));
    }

    /// Missing required attributes fail before any request is sent
    #[tokio::test]
    async fn test_create_requires_attributes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut sync = sync_for(&server);
        let mut state = AdwDeclared {
            db_name: None,
            ..declared()
        };

        let err = driver().create(&mut sync, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::MissingAttribute {
                attribute: "db_name",
                ..
            }
        ));
    }

    /// A 400 is permanent and is not retried
    #[tokio::test]
    async fn test_create_bad_request_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COLLECTION))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "InvalidParameter",
                "message": "dbName is taken"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut sync = sync_for(&server);
        let err = driver().create(&mut sync, &mut declared()).await.unwrap_err();

        match err {
            SyncError::Remote { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert!(source.to_string().contains("dbName is taken"));
            }
            other => panic!("expected Remote, got {other:?}"),
        }
        assert!(sync.identity().is_none());
    }
}

/// Test module for read and update scenarios
mod update_tests {
    use super::*;

    /// 503 is retried transparently
    #[tokio::test]
    async fn test_read_retries_service_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("AVAILABLE", 4)))
            .mount(&server)
            .await;

        let mut sync = existing(&server);
        let mut state = AdwDeclared::default();
        let report = driver().read(&mut sync, &mut state).await.expect("read should succeed");

        assert!(report.present);
        assert_eq!(state.cpu_core_count, Some(4));
    }

    /// A deleted warehouse reads as absent
    #[tokio::test]
    async fn test_read_not_found_is_absent() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "NotAuthorizedOrNotFound",
                "message": "not found"
            })))
            .mount(&server)
            .await;

        let mut sync = existing(&server);
        let report = driver()
            .read(&mut sync, &mut AdwDeclared::default())
            .await
            .expect("read should succeed");

        assert!(!report.present);
    }

    /// Only the changed attribute is sent
    #[tokio::test]
    async fn test_update_sends_only_changes() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(ADW_PATH))
            .and(body_json(json!({"cpuCoreCount": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("SCALE_IN_PROGRESS", 2)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("AVAILABLE", 2)))
            .mount(&server)
            .await;

        let prior = declared();
        let mut desired = AdwDeclared {
            cpu_core_count: Some(2),
            ..declared()
        };

        let mut sync = existing(&server);
        let report = driver()
            .update(&mut sync, &prior, &mut desired)
            .await
            .expect("update should succeed");

        assert!(report.mutation_sent);
        assert_eq!(desired.cpu_core_count, Some(2));
        assert_eq!(desired.state, Some(LifecycleState::new("AVAILABLE")));
    }

    /// Password change alongside scaling is rejected before any request
    #[tokio::test]
    async fn test_update_mutually_exclusive_sends_nothing() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let prior = declared();
        let mut desired = AdwDeclared {
            admin_password: Some("Another1#Password".to_string()),
            cpu_core_count: Some(2),
            ..declared()
        };

        let mut sync = existing(&server);
        let err = driver().update(&mut sync, &prior, &mut desired).await.unwrap_err();
        assert!(matches!(err, SyncError::MutuallyExclusive { .. }));
    }
}

/// Test module for delete scenarios
mod delete_tests {
    use super::*;

    /// Delete polls until the warehouse disappears
    #[tokio::test]
    async fn test_delete_waits_for_disappearance() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("TERMINATING", 1)))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut sync = existing(&server);
        let report = driver().delete(&mut sync).await.expect("delete should succeed");

        assert_eq!(report.operation, Operation::Delete);
        assert!(report.mutation_sent);
        assert_eq!(report.poll_iterations, 1);
    }

    /// Deleting an already-deleted warehouse succeeds without polling
    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(ADW_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(adw("TERMINATED", 1)))
            .expect(0)
            .mount(&server)
            .await;

        let mut sync = existing(&server);
        let report = driver().delete(&mut sync).await.expect("delete should succeed");

        assert!(!report.mutation_sent);
        assert!(!report.waited());
    }
}
