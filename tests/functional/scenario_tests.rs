//! Multi-step upgrade scenario tests.
//!
//! Walk the decision logic through the lifecycle of an upgrade: entering
//! the upgrade, reconfiguring plans on a version bump, reporting per-node
//! progress, neutralizing foreign plans, and settling back to Upgraded.

use crate::fixtures::{ClusterBuilder, PlanBuilder, with_applying};
use k3s_upgrade_operator::controller::conditions::{
    ConditionOutcome, drive_upgraded_condition,
};
use k3s_upgrade_operator::controller::plans::{
    RANCHER_MANAGED_LABEL, SYSTEM_UPGRADE_NAMESPACE, configure_master_plan, configure_worker_plan,
    deactivate, generate_master_plan, generate_worker_plan, has_deactivator, is_rancher_managed,
    plans_equal,
};
use k3s_upgrade_operator::crd::ConditionStatus;

// ============================================================================
// Entering an upgrade
// ============================================================================

/// A settled cluster whose plans have not been observed yet flips to
/// Unknown with the generic message, and stays there on the next pass.
#[test]
fn test_fresh_upgrade_entry() {
    let mut cluster = ClusterBuilder::new("downstream-a")
        .version("v1.18.2+k3s1")
        .upgraded(ConditionStatus::True, "")
        .build();

    let outcome = drive_upgraded_condition(&mut cluster, None, None);
    assert_eq!(outcome, ConditionOutcome::Persist);
    assert!(cluster.upgraded_is_unknown());
    assert_eq!(cluster.upgraded_message(), "cluster is being upgraded");

    // second pass before the plans report anything: no update churn
    let outcome = drive_upgraded_condition(&mut cluster, None, None);
    assert_eq!(outcome, ConditionOutcome::NoChange);
    assert_eq!(cluster.upgraded_message(), "cluster is being upgraded");
}

// ============================================================================
// Version bump against existing plans
// ============================================================================

/// Bumping the declared version reconfigures both plans while keeping
/// operator edits, and the comparator flags the drift exactly once.
#[test]
fn test_version_bump_reconfigures_plans() {
    let mut master = generate_master_plan("v1.17.9+k3s1", 1, false);
    master
        .spec
        .tolerations
        .push(k8s_openapi::api::core::v1::Toleration {
            key: Some("node-role.kubernetes.io/etcd".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        });
    let worker = generate_worker_plan("v1.17.9+k3s1", 2, true);

    let desired_master = configure_master_plan(&master, "v1.18.2+k3s1", 1, false);
    let desired_worker = configure_worker_plan(&worker, "v1.18.2+k3s1", 2, true);

    assert!(!plans_equal(&master, &desired_master));
    assert!(!plans_equal(&worker, &desired_worker));

    // the operator's toleration survives reconfiguration
    assert_eq!(desired_master.spec.tolerations, master.spec.tolerations);
    assert_eq!(desired_master.spec.version, "v1.18.2+k3s1");

    // re-running the configuration converges
    let again = configure_master_plan(&desired_master, "v1.18.2+k3s1", 1, false);
    assert!(plans_equal(&desired_master, &again));
}

/// With no drift, the comparator reports equality so no update is issued.
#[test]
fn test_no_drift_no_update() {
    let master = generate_master_plan("v1.18.2+k3s1", 2, true);
    let desired = configure_master_plan(&master, "v1.18.2+k3s1", 2, true);
    assert!(plans_equal(&master, &desired));
}

// ============================================================================
// Progress reporting
// ============================================================================

/// Control-plane progress is reported first, then worker progress, then the
/// condition settles to True once nothing is applying.
#[test]
fn test_progress_reporting_through_completion() {
    let mut cluster = ClusterBuilder::new("downstream-a")
        .version("v1.18.2+k3s1")
        .server_concurrency(1)
        .worker_concurrency(2)
        .upgraded(ConditionStatus::Unknown, "cluster is being upgraded")
        .build();

    let master = generate_master_plan("v1.18.2+k3s1", 1, false);
    let worker = generate_worker_plan("v1.18.2+k3s1", 2, false);

    // masters first
    let master_applying = with_applying(master.clone(), &["m1"]);
    let worker_applying = with_applying(worker.clone(), &["w1", "w2", "w3"]);
    let outcome = drive_upgraded_condition(
        &mut cluster,
        Some(&master_applying),
        Some(&worker_applying),
    );
    assert_eq!(outcome, ConditionOutcome::Persist);
    assert_eq!(cluster.upgraded_message(), "controlplane node [m1] being upgraded");

    // identical progress on the next pass only re-enqueues
    let outcome = drive_upgraded_condition(
        &mut cluster,
        Some(&master_applying),
        Some(&worker_applying),
    );
    assert_eq!(outcome, ConditionOutcome::EnqueueUnchanged);

    // masters done, workers still going (two at a time per concurrency)
    let outcome = drive_upgraded_condition(&mut cluster, Some(&master), Some(&worker_applying));
    assert_eq!(outcome, ConditionOutcome::Persist);
    assert_eq!(cluster.upgraded_message(), "worker node [w1, w2] being upgraded");

    // everything settled
    let outcome = drive_upgraded_condition(&mut cluster, Some(&master), Some(&worker));
    assert_eq!(outcome, ConditionOutcome::Persist);
    assert!(cluster.upgraded_is_true());
}

// ============================================================================
// Foreign plans
// ============================================================================

/// A plan without the managed sentinel gets the deactivator appended; one
/// that already carries it is left alone.
#[test]
fn test_foreign_plan_neutralization() {
    let foreign = PlanBuilder::new("community-upgrader")
        .namespace("upgrades")
        .version("v1.19.0+k3s1")
        .build();
    assert!(!is_rancher_managed(&foreign));
    assert!(!has_deactivator(&foreign));

    let mut neutralized = foreign.clone();
    deactivate(&mut neutralized);
    assert!(has_deactivator(&neutralized));

    // a second reconcile sees the deactivator and skips the plan
    assert!(has_deactivator(&neutralized));
}

/// The sentinel label is all that distinguishes managed plans; its value is
/// irrelevant.
#[test]
fn test_sentinel_label_detection() {
    let managed = PlanBuilder::new("some-plan")
        .namespace(SYSTEM_UPGRADE_NAMESPACE)
        .label(RANCHER_MANAGED_LABEL, "anything")
        .build();
    assert!(is_rancher_managed(&managed));

    let unmanaged = PlanBuilder::new("some-plan")
        .namespace(SYSTEM_UPGRADE_NAMESPACE)
        .label("other-label", "true")
        .build();
    assert!(!is_rancher_managed(&unmanaged));
}

/// A managed-named plan parked in the wrong namespace never compares equal
/// to the canonical one, so recreating the pair in the right namespace is
/// always treated as drift.
#[test]
fn test_wrong_namespace_plan_is_not_canonical() {
    let stray = PlanBuilder::new("k3s-master-plan")
        .namespace("default")
        .label(RANCHER_MANAGED_LABEL, "true")
        .build();
    let canonical = generate_master_plan("v1.18.2+k3s1", 1, false);
    assert!(!plans_equal(&stray, &canonical));
    assert_eq!(
        canonical.metadata.namespace.as_deref(),
        Some(SYSTEM_UPGRADE_NAMESPACE)
    );
}

// ============================================================================
// Stability
// ============================================================================

/// A cluster already Upgraded with idle plans never takes a detour through
/// Unknown.
#[test]
fn test_settled_cluster_stays_settled() {
    let mut cluster = ClusterBuilder::new("downstream-a")
        .version("v1.18.2+k3s1")
        .upgraded(ConditionStatus::True, "")
        .build();

    let master = generate_master_plan("v1.18.2+k3s1", 1, false);
    let worker = generate_worker_plan("v1.18.2+k3s1", 1, false);

    for _ in 0..3 {
        drive_upgraded_condition(&mut cluster, Some(&master), Some(&worker));
        assert!(cluster.upgraded_is_true());
    }
}
