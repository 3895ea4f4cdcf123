//! Property-based tests.
//!
//! Uses proptest to generate random inputs and verify invariants of plan
//! handling, condition message composition and shell escaping.

use proptest::prelude::*;

use crate::fixtures::{ClusterBuilder, PlanBuilder, with_applying};
use k3s_upgrade_operator::controller::conditions::{
    ConditionOutcome, MAX_DISPLAY_NODES, drive_upgraded_condition, upgrading_message,
};
use k3s_upgrade_operator::controller::plans::{
    configure_master_plan, deactivate, generate_master_plan, generate_worker_plan,
    has_deactivator, plans_equal,
};
use k3s_upgrade_operator::crd::ConditionStatus;
use k3s_upgrade_operator::registration::commands::escape_special_chars;

/// Strategy for plausible k3s version strings.
fn any_version() -> impl Strategy<Value = String> {
    (1u8..=30, 0u8..=20, 1u8..=9).prop_map(|(minor, patch, build)| {
        format!("v1.{minor}.{patch}+k3s{build}")
    })
}

/// Strategy for node name lists.
fn any_nodes() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z0-9-]{0,10}", 0..25)
}

proptest! {
    /// Deactivation always leaves a detectable deactivator and never
    /// removes pre-existing selector expressions.
    #[test]
    fn prop_deactivation_is_detectable(name in "[a-z][a-z0-9-]{0,20}", ns in "[a-z][a-z0-9-]{0,20}") {
        let mut plan = PlanBuilder::new(name).namespace(ns).build();
        let before = plan
            .spec
            .node_selector
            .as_ref()
            .and_then(|s| s.match_expressions.as_ref())
            .map_or(0, |e| e.len());

        deactivate(&mut plan);

        prop_assert!(has_deactivator(&plan));
        let after = plan
            .spec
            .node_selector
            .as_ref()
            .and_then(|s| s.match_expressions.as_ref())
            .map_or(0, |e| e.len());
        prop_assert_eq!(after, before + 1);
    }

    /// Generating twice from the same inputs never registers as drift, and
    /// generation followed by configuration with the same inputs converges.
    #[test]
    fn prop_generation_is_stable(
        version in any_version(),
        concurrency in 1i64..=50,
        drain in any::<bool>(),
    ) {
        let a = generate_master_plan(&version, concurrency, drain);
        let b = generate_master_plan(&version, concurrency, drain);
        prop_assert!(plans_equal(&a, &b));

        let configured = configure_master_plan(&a, &version, concurrency, drain);
        prop_assert!(plans_equal(&a, &configured));

        let worker = generate_worker_plan(&version, concurrency, drain);
        prop_assert!(!plans_equal(&a, &worker));
    }

    /// Reconfiguration changes nothing except the driven fields.
    #[test]
    fn prop_configure_preserves_undriven_fields(
        old_version in any_version(),
        new_version in any_version(),
        concurrency in 1i64..=50,
        drain in any::<bool>(),
    ) {
        let mut observed = generate_master_plan(&old_version, 1, false);
        observed.spec.channel = Some("https://update.k3s.io/v1-release/channels/stable".to_string());

        let configured = configure_master_plan(&observed, &new_version, concurrency, drain);

        prop_assert_eq!(&configured.spec.version, &new_version);
        prop_assert_eq!(configured.spec.concurrency, concurrency);
        prop_assert_eq!(&configured.metadata, &observed.metadata);
        prop_assert_eq!(&configured.spec.channel, &observed.spec.channel);
        prop_assert_eq!(&configured.spec.node_selector, &observed.spec.node_selector);
        prop_assert_eq!(&configured.spec.service_account_name, &observed.spec.service_account_name);
    }

    /// The condition message shows min(concurrency, applying, cap) nodes,
    /// in plan order.
    #[test]
    fn prop_upgrading_message_bounds(concurrency in -5i64..=100, nodes in any_nodes()) {
        let message = upgrading_message(concurrency, &nodes);
        let shown: Vec<&str> = if message.is_empty() {
            Vec::new()
        } else {
            message.split(", ").collect()
        };

        let expected = usize::try_from(concurrency)
            .unwrap_or(0)
            .min(nodes.len())
            .min(MAX_DISPLAY_NODES);
        prop_assert_eq!(shown.len(), expected);
        for (shown_node, node) in shown.iter().zip(nodes.iter()) {
            prop_assert_eq!(*shown_node, node.as_str());
        }
    }

    /// A settled cluster with idle plans never leaves True, regardless of
    /// concurrency settings.
    #[test]
    fn prop_no_detour_through_unknown(
        version in any_version(),
        server_concurrency in 1i64..=10,
        worker_concurrency in 1i64..=10,
    ) {
        let mut cluster = ClusterBuilder::new("c1")
            .version(&version)
            .server_concurrency(server_concurrency)
            .worker_concurrency(worker_concurrency)
            .upgraded(ConditionStatus::True, "")
            .build();

        let master = generate_master_plan(&version, server_concurrency, false);
        let worker = generate_worker_plan(&version, worker_concurrency, false);
        drive_upgraded_condition(&mut cluster, Some(&master), Some(&worker));
        prop_assert!(cluster.upgraded_is_true());
    }

    /// While nodes are applying, running the driver twice with the same
    /// observation only ever asks for one persisted update.
    #[test]
    fn prop_identical_progress_deduplicates(nodes in prop::collection::vec("[a-z][a-z0-9-]{0,10}", 1..10)) {
        let mut cluster = ClusterBuilder::new("c1")
            .version("v1.18.2+k3s1")
            .server_concurrency(2)
            .build();

        let node_refs: Vec<&str> = nodes.iter().map(String::as_str).collect();
        let master = with_applying(generate_master_plan("v1.18.2+k3s1", 2, false), &node_refs);

        let first = drive_upgraded_condition(&mut cluster, Some(&master), None);
        prop_assert_eq!(first, ConditionOutcome::Persist);
        let second = drive_upgraded_condition(&mut cluster, Some(&master), None);
        prop_assert_eq!(second, ConditionOutcome::EnqueueUnchanged);
    }

    /// Escaping never loses characters, round-trips by unescaping, and
    /// leaves no special character unescaped.
    #[test]
    fn prop_escaping_round_trips(password in ".{0,40}") {
        let escaped = escape_special_chars(&password);
        prop_assert!(escaped.len() >= password.len());

        // unescape: drop one backslash before each escaped character
        let mut unescaped = String::new();
        let mut chars = escaped.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\'
                && let Some(&next) = chars.peek()
                && matches!(next, '"' | '`' | '$' | '\\')
            {
                unescaped.push(next);
                chars.next();
            } else {
                unescaped.push(c);
            }
        }
        prop_assert_eq!(unescaped, password);

        // every special character in the output is part of an escape pair
        let mut prev_backslash = false;
        for c in escaped.chars() {
            if matches!(c, '"' | '`' | '$') {
                prop_assert!(prev_backslash);
            }
            prev_backslash = c == '\\' && !prev_backslash;
        }
    }
}
