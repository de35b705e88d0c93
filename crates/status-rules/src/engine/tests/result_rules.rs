use super::common::*;
use chrono::{Duration, TimeZone, Utc};

use crate::engine::{
    AuditAction, EngineConfig, EntityKind, NewRule, RuleChanges, RuleError, StatusResolution,
    TestSignal, TiePolicy,
};

fn resolved_status(resolution: &StatusResolution) -> &str {
    resolution
        .status_id()
        .map(|id| id.as_str())
        .expect("a status resolved")
}

#[test]
fn create_rule_returns_hydrated_rule_in_canonical_order() {
    let (engine, _, _) = build_engine();

    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");

    assert_eq!(created.jurisdiction.name, "Polk County");
    assert_eq!(created.test_type.id, pcr());
    assert_eq!(created.rule.priority, Some(5));
    let results: Vec<_> = created
        .rule
        .mappings
        .iter()
        .map(|mapping| mapping.test_type_result_id.as_str())
        .collect();
    assert_eq!(results, vec!["negative", "positive"]);
}

#[test]
fn second_rule_for_same_pair_conflicts_regardless_of_mappings() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("first rule");

    let different = NewRule {
        priority: Some(1),
        mappings: vec![mapping("positive", "monitor")],
        ..pcr_rule(None)
    };
    match engine.create_rule(&admin(), different) {
        Err(RuleError::Conflict(message)) => assert!(message.contains("PCR")),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(engine.list_rules(&j1()).expect("list").len(), 1);
}

#[test]
fn result_from_another_test_type_is_an_invalid_reference() {
    let (engine, _, _) = build_engine();
    let rule = NewRule {
        mappings: vec![mapping("reactive", "monitor")],
        ..pcr_rule(Some(1))
    };

    match engine.create_rule(&admin(), rule) {
        Err(RuleError::InvalidReference(message)) => assert!(message.contains("reactive")),
        other => panic!("expected invalid reference, got {other:?}"),
    }
}

#[test]
fn status_from_another_jurisdiction_is_an_invalid_reference() {
    let (engine, _, _) = build_engine();
    let rule = NewRule {
        mappings: vec![mapping("positive", "j2-isolate")],
        ..pcr_rule(Some(1))
    };

    assert!(matches!(
        engine.create_rule(&admin(), rule),
        Err(RuleError::InvalidReference(_))
    ));
}

#[test]
fn duplicate_result_key_is_an_invalid_argument() {
    let (engine, _, _) = build_engine();
    let rule = NewRule {
        mappings: vec![
            mapping("positive", "quarantine"),
            mapping("positive", "monitor"),
        ],
        ..pcr_rule(Some(1))
    };

    assert!(matches!(
        engine.create_rule(&admin(), rule),
        Err(RuleError::InvalidArgument(_))
    ));
}

#[test]
fn unknown_jurisdiction_or_test_type_is_not_found() {
    let (engine, _, _) = build_engine();

    let missing_jurisdiction = NewRule {
        jurisdiction_id: crate::engine::JurisdictionId::new("J9"),
        ..pcr_rule(None)
    };
    assert!(matches!(
        engine.create_rule(&admin(), missing_jurisdiction),
        Err(RuleError::NotFound {
            kind: EntityKind::Jurisdiction,
            ..
        })
    ));

    let missing_test_type = NewRule {
        test_type_id: crate::engine::TestTypeId::new("SEROLOGY"),
        mappings: Vec::new(),
        ..pcr_rule(None)
    };
    assert!(matches!(
        engine.create_rule(&admin(), missing_test_type),
        Err(RuleError::NotFound {
            kind: EntityKind::TestType,
            ..
        })
    ));
}

#[test]
fn created_rule_round_trips_through_listing() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");

    let listed = engine.list_rules(&j1()).expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.rule.id);
    assert_eq!(listed[0].priority, Some(5));
    assert_eq!(listed[0].mappings, created.rule.mappings);

    let fetched = engine.rule(&created.rule.id).expect("rule fetched");
    assert_eq!(fetched, created);
}

#[test]
fn listing_orders_by_priority_with_unset_priorities_last() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(None))
        .expect("pcr rule");
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");

    let order: Vec<_> = engine
        .list_rules(&j1())
        .expect("list")
        .into_iter()
        .map(|rule| rule.test_type_id)
        .collect();
    assert_eq!(order, vec![antigen(), pcr()]);
    assert!(engine.list_rules(&j2()).expect("empty list").is_empty());
}

#[test]
fn updating_a_rule_changes_resolution_without_adding_rows() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");
    let signals = [TestSignal::new("PCR", "positive")];

    let before = engine.resolve_status(&j1(), &signals).expect("resolves");
    assert_eq!(resolved_status(&before), "quarantine");

    let updated = engine
        .update_rule(
            &admin(),
            &created.rule.id,
            RuleChanges {
                priority: Some(5),
                mappings: vec![mapping("positive", "healthy"), mapping("negative", "healthy")],
            },
        )
        .expect("rule updated");
    assert_eq!(updated.rule.id, created.rule.id);
    assert_eq!(updated.rule.sequence, created.rule.sequence);

    let after = engine.resolve_status(&j1(), &signals).expect("resolves");
    assert_eq!(resolved_status(&after), "healthy");
    assert_eq!(engine.list_rules(&j1()).expect("list").len(), 1);
}

#[test]
fn rejected_update_leaves_the_rule_untouched() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");

    let result = engine.update_rule(
        &admin(),
        &created.rule.id,
        RuleChanges {
            priority: Some(1),
            mappings: vec![mapping("positive", "j2-clear")],
        },
    );
    assert!(matches!(result, Err(RuleError::InvalidReference(_))));

    let stored = engine.rule(&created.rule.id).expect("rule still present");
    assert_eq!(stored.rule.priority, Some(5));
    assert_eq!(stored.rule.mappings, created.rule.mappings);
}

#[test]
fn deleting_a_missing_rule_is_not_found() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");

    engine
        .delete_rule(&admin(), &created.rule.id)
        .expect("first delete");
    assert!(matches!(
        engine.delete_rule(&admin(), &created.rule.id),
        Err(RuleError::NotFound { .. })
    ));
    assert!(matches!(
        engine.rule(&created.rule.id),
        Err(RuleError::NotFound { .. })
    ));

    engine
        .create_rule(&admin(), pcr_rule(Some(3)))
        .expect("pair is free again");
}

#[test]
fn lower_priority_value_wins_resolution() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(1)))
        .expect("pcr rule");
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");

    let resolution = engine
        .resolve_status(
            &j1(),
            &[
                TestSignal::new("ANTIGEN", "reactive"),
                TestSignal::new("PCR", "positive"),
            ],
        )
        .expect("resolves");

    assert_eq!(resolved_status(&resolution), "quarantine");
    match resolution {
        StatusResolution::Resolved(resolved) => {
            assert_eq!(resolved.winner.test_type_id, pcr());
            let next_step = resolved.next_step.expect("positive carries guidance");
            assert_eq!(next_step.text, "Isolate for ten days");
            assert!(next_step.activates_at.is_none());
        }
        StatusResolution::NoStatus => panic!("expected a resolved status"),
    }
}

#[test]
fn unmatched_signals_resolve_to_no_status() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");

    let resolution = engine
        .resolve_status(
            &j1(),
            &[
                TestSignal::new("PCR", "positive"),
                TestSignal::new("ANTIGEN", "non-reactive"),
            ],
        )
        .expect("resolves");
    assert_eq!(resolution, StatusResolution::NoStatus);

    let empty = engine.resolve_status(&j1(), &[]).expect("resolves");
    assert_eq!(empty, StatusResolution::NoStatus);
}

#[test]
fn resolving_for_unknown_jurisdiction_is_not_found() {
    let (engine, _, _) = build_engine();
    assert!(matches!(
        engine.resolve_status(
            &crate::engine::JurisdictionId::new("J9"),
            &[TestSignal::new("PCR", "positive")]
        ),
        Err(RuleError::NotFound { .. })
    ));
}

#[test]
fn equal_priorities_naming_different_statuses_are_ambiguous() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(3)))
        .expect("pcr rule");
    engine
        .create_rule(&admin(), antigen_rule(Some(3)))
        .expect("antigen rule");

    let signals = [
        TestSignal::new("PCR", "positive"),
        TestSignal::new("ANTIGEN", "reactive"),
    ];
    match engine.resolve_status(&j1(), &signals) {
        Err(RuleError::Ambiguous {
            priority,
            candidates,
        }) => {
            assert_eq!(priority, Some(3));
            let statuses: Vec<_> = candidates
                .iter()
                .map(|candidate| candidate.jurisdiction_status_id.as_str())
                .collect();
            assert_eq!(statuses, vec!["quarantine", "monitor"]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

#[test]
fn equal_priorities_naming_the_same_status_resolve() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(3)))
        .expect("pcr rule");
    engine
        .create_rule(
            &admin(),
            NewRule {
                mappings: vec![mapping("reactive", "quarantine")],
                ..antigen_rule(Some(3))
            },
        )
        .expect("antigen rule");

    let resolution = engine
        .resolve_status(
            &j1(),
            &[
                TestSignal::new("ANTIGEN", "reactive"),
                TestSignal::new("PCR", "positive"),
            ],
        )
        .expect("no ambiguity");
    assert_eq!(resolved_status(&resolution), "quarantine");
}

#[test]
fn first_inserted_policy_settles_ties_by_storage_order() {
    let (engine, _, _) = build_engine_with(EngineConfig {
        tie_policy: TiePolicy::FirstInserted,
        ..EngineConfig::default()
    });
    engine
        .create_rule(&admin(), antigen_rule(None))
        .expect("antigen rule");
    engine
        .create_rule(&admin(), pcr_rule(None))
        .expect("pcr rule");

    let resolution = engine
        .resolve_status(
            &j1(),
            &[
                TestSignal::new("PCR", "positive"),
                TestSignal::new("ANTIGEN", "reactive"),
            ],
        )
        .expect("tie settled");
    assert_eq!(resolved_status(&resolution), "monitor");
}

#[test]
fn expired_results_no_longer_contribute() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");
    let as_of = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    let stale = TestSignal::new("ANTIGEN", "reactive").observed_at(as_of - Duration::hours(72));
    let expired = engine
        .resolve_status_at(&j1(), &[stale], as_of)
        .expect("resolves");
    assert_eq!(expired, StatusResolution::NoStatus);

    let observed = as_of - Duration::hours(10);
    let fresh = TestSignal::new("ANTIGEN", "reactive").observed_at(observed);
    match engine
        .resolve_status_at(&j1(), &[fresh], as_of)
        .expect("resolves")
    {
        StatusResolution::Resolved(resolved) => {
            assert_eq!(resolved.status.id, status("monitor"));
            let next_step = resolved.next_step.expect("guidance present");
            assert_eq!(next_step.activates_at, Some(observed + Duration::hours(24)));
        }
        StatusResolution::NoStatus => panic!("fresh result should resolve"),
    }
}

#[test]
fn signals_without_observation_time_never_expire() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), antigen_rule(Some(2)))
        .expect("antigen rule");
    let far_future = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();

    let resolution = engine
        .resolve_status_at(&j1(), &[TestSignal::new("ANTIGEN", "reactive")], far_future)
        .expect("resolves");
    assert_eq!(resolved_status(&resolution), "monitor");
}

#[test]
fn repeated_results_for_one_test_keep_the_latest_signal() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("pcr rule");

    let history = [
        TestSignal::new("PCR", "negative"),
        TestSignal::new("PCR", "positive"),
    ];
    let resolution = engine
        .resolve_status(&j1(), &history)
        .expect("same-rule signals are not ambiguous");
    assert_eq!(resolved_status(&resolution), "quarantine");
}

#[test]
fn observation_time_decides_between_results_for_one_test() {
    let (engine, _, _) = build_engine();
    engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("pcr rule");
    let as_of = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    let newer_negative = TestSignal::new("PCR", "negative").observed_at(as_of - Duration::hours(2));
    let older_positive =
        TestSignal::new("PCR", "positive").observed_at(as_of - Duration::hours(30));
    let resolution = engine
        .resolve_status_at(&j1(), &[newer_negative, older_positive.clone()], as_of)
        .expect("resolves");
    assert_eq!(resolved_status(&resolution), "healthy");

    let untimed_negative = TestSignal::new("PCR", "negative");
    let resolution = engine
        .resolve_status_at(&j1(), &[older_positive, untimed_negative], as_of)
        .expect("resolves");
    assert_eq!(resolved_status(&resolution), "quarantine");
}

#[test]
fn rule_mutations_are_audited_with_actor_and_annotation() {
    let (engine, _, audit) = build_engine();
    let created = engine
        .create_rule(&admin(), pcr_rule(Some(5)))
        .expect("rule created");
    engine
        .update_rule(
            &admin(),
            &created.rule.id,
            RuleChanges {
                priority: Some(4),
                mappings: vec![mapping("positive", "quarantine")],
            },
        )
        .expect("rule updated");
    engine
        .delete_rule(&admin(), &created.rule.id)
        .expect("rule deleted");

    let events: Vec<_> = audit
        .events()
        .into_iter()
        .filter(|event| event.entity_kind == EntityKind::ResultMappingRule)
        .collect();
    let actions: Vec<_> = events.iter().map(|event| event.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Created,
            AuditAction::Updated,
            AuditAction::Deleted
        ]
    );
    assert!(events
        .iter()
        .all(|event| event.entity_id == created.rule.id.as_str()));
    assert_eq!(events[0].actor.as_str(), "admin@county.gov");
    assert_eq!(events[0].annotation.as_deref(), Some("fixture change"));
    assert!(events[0].before.is_none());

    let before = events[1].before.as_ref().expect("update has before state");
    let after = events[1].after.as_ref().expect("update has after state");
    assert_eq!(before["priority"], 5);
    assert_eq!(after["priority"], 4);
    assert!(events[2].after.is_none());
}

#[test]
fn failed_writes_are_not_audited() {
    let (engine, _, audit) = build_engine();
    let rule = NewRule {
        mappings: vec![mapping("reactive", "monitor")],
        ..pcr_rule(Some(1))
    };
    assert!(engine.create_rule(&admin(), rule).is_err());
    assert!(audit
        .events()
        .iter()
        .all(|event| event.entity_kind != EntityKind::ResultMappingRule));
}
