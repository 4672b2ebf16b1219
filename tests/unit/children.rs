//! Child-object reconciler tests: creation, drift correction and foreign objects

use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use postgres_controller::controller::{ChildOutcome, Error, ensure_exists};
use postgres_controller::resources::{build_endpoint, build_workload};

use crate::common::*;

fn container_image(env: &TestEnv, name: &str) -> Option<String> {
    env.workload(name)?
        .spec?
        .template
        .spec?
        .containers
        .into_iter()
        .find(|c| c.name == "postgresql")?
        .image
}

mod ensure_exists_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_then_reports_unchanged() {
        let env = TestEnv::new();
        let pg = create_test_postgres("orders");

        let first = ensure_exists(env.services.as_ref(), &pg, build_endpoint(&pg))
            .await
            .unwrap();
        assert_eq!(first, ChildOutcome::Created);

        let second = ensure_exists(env.services.as_ref(), &pg, build_endpoint(&pg))
            .await
            .unwrap();
        assert!(matches!(second, ChildOutcome::Unchanged(_)));
        assert_eq!(env.services.write_count(), 1);
    }

    #[tokio::test]
    async fn test_created_child_carries_owner_reference() {
        let env = TestEnv::new();
        let pg = create_test_postgres("orders");
        ensure_exists(env.statefulsets.as_ref(), &pg, build_workload(&pg, "orders-credentials"))
            .await
            .unwrap();

        let sts = env.workload("orders").unwrap();
        let owners = sts.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "uid-orders");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[tokio::test]
    async fn test_foreign_object_with_same_name_is_rejected() {
        let env = TestEnv::new();
        let pg = create_test_postgres("orders");
        env.services.insert(
            TEST_NAMESPACE,
            Service {
                metadata: ObjectMeta {
                    name: Some("orders-postgres".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let err = ensure_exists(env.services.as_ref(), &pg, build_endpoint(&pg))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert_eq!(env.services.write_count(), 0);
    }
}

mod drift_tests {
    use super::*;

    #[tokio::test]
    async fn test_changed_image_is_restored() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.statefulsets.modify(TEST_NAMESPACE, "orders", |sts| {
            let pod = sts.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
            pod.containers[0].image = Some("postgres:9.6".to_string());
            pod.termination_grace_period_seconds = Some(90);
            sts.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert("team".to_string(), "payments".to_string());
        });

        let action = env.reconcile("orders").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert_eq!(container_image(&env, "orders").as_deref(), Some("postgres:16"));

        // Fields set by others survive the write-back
        let sts = env.workload("orders").unwrap();
        assert_eq!(
            sts.metadata.annotations.unwrap().get("team").map(String::as_str),
            Some("payments")
        );
        assert_eq!(
            sts.spec
                .unwrap()
                .template
                .spec
                .unwrap()
                .termination_grace_period_seconds,
            Some(90)
        );
        assert_eq!(env.statefulsets.count_of(WriteOp::Update), 1);
    }

    #[tokio::test]
    async fn test_version_change_rolls_image() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.postgres.modify(TEST_NAMESPACE, "orders", |pg| {
            pg.spec.version = "17".to_string();
        });
        env.reconcile("orders").await.unwrap();

        assert_eq!(container_image(&env, "orders").as_deref(), Some("postgres:17"));
    }

    #[tokio::test]
    async fn test_server_assigned_fields_are_not_drift() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.services.modify(TEST_NAMESPACE, "orders-postgres", |svc| {
            svc.spec.as_mut().unwrap().cluster_ip = Some("10.96.0.42".to_string());
        });
        let writes = env.total_writes();
        env.reconcile("orders").await.unwrap();

        assert_eq!(env.total_writes(), writes);
        assert_eq!(
            env.endpoint("orders").unwrap().spec.unwrap().cluster_ip.as_deref(),
            Some("10.96.0.42")
        );
    }

    #[tokio::test]
    async fn test_removed_labels_are_restored() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.services.modify(TEST_NAMESPACE, "orders-postgres", |svc| {
            svc.metadata.labels = None;
        });
        env.reconcile("orders").await.unwrap();

        let labels = env.endpoint("orders").unwrap().metadata.labels.unwrap();
        assert_eq!(
            labels.get("postgres.snappcloud.io/instance").map(String::as_str),
            Some("orders")
        );
    }

    #[tokio::test]
    async fn test_drift_write_conflict_propagates() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.statefulsets.modify(TEST_NAMESPACE, "orders", |sts| {
            sts.spec.as_mut().unwrap().replicas = Some(3);
        });
        env.statefulsets
            .conflict_next_update
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = env.reconcile("orders").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(env.workload("orders").unwrap().spec.unwrap().replicas, Some(3));
    }

    #[tokio::test]
    async fn test_terminating_child_waits_for_recreation() {
        let env = TestEnv::new().with_instance(create_test_postgres("orders"));
        env.reconcile_until_settled("orders").await.unwrap();

        env.statefulsets.modify(TEST_NAMESPACE, "orders", |sts| {
            sts.metadata.deletion_timestamp = Some(deletion_time());
        });
        let writes = env.total_writes();

        let action = env.reconcile("orders").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(env.total_writes(), writes);

        // Once gone it is created again
        env.statefulsets.remove(TEST_NAMESPACE, "orders");
        env.reconcile("orders").await.unwrap();
        assert_eq!(env.statefulsets.count_of(WriteOp::Create), 2);
    }
}
