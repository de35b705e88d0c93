use super::common::*;

use crate::engine::{
    AuditAction, EntityKind, NewSymptomTable, RuleError, SymptomTableChanges,
};

fn county_table() -> NewSymptomTable {
    NewSymptomTable {
        jurisdiction_id: j1(),
        gr1_threshold: 3,
        gr2_threshold: 2,
        entries: symptom_entries(),
    }
}

#[test]
fn thresholds_select_the_matching_cell() {
    let (engine, _, _) = build_engine();
    engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    let outcome = engine.evaluate_symptoms(&j1(), 3, 1).expect("evaluates");
    assert!(outcome.gr1);
    assert!(!outcome.gr2);
    assert_eq!(outcome.status.id, status("monitor"));
    assert_eq!(outcome.next_step, "follow monitor guidance");

    let outcome = engine.evaluate_symptoms(&j1(), 2, 2).expect("evaluates");
    assert!(!outcome.gr1);
    assert!(outcome.gr2);
    assert_eq!(outcome.status.id, status("monitor"));

    let outcome = engine.evaluate_symptoms(&j1(), 0, 0).expect("evaluates");
    assert_eq!(outcome.status.id, status("none"));

    let outcome = engine.evaluate_symptoms(&j1(), 7, 4).expect("evaluates");
    assert_eq!(outcome.status.id, status("quarantine"));
}

#[test]
fn evaluation_is_total_for_any_counts() {
    let (engine, _, _) = build_engine();
    engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    for gr1_count in [0, 1, 2, 3, 4, 10, u32::MAX] {
        for gr2_count in [0, 1, 2, 3, 10, u32::MAX] {
            let outcome = engine
                .evaluate_symptoms(&j1(), gr1_count, gr2_count)
                .expect("every combination is defined");
            assert_eq!(outcome.gr1, gr1_count >= 3);
            assert_eq!(outcome.gr2, gr2_count >= 2);
        }
    }
}

#[test]
fn zero_thresholds_always_raise_both_flags() {
    let (engine, _, _) = build_engine();
    engine
        .create_symptom_table(
            &admin(),
            NewSymptomTable {
                gr1_threshold: 0,
                gr2_threshold: 0,
                ..county_table()
            },
        )
        .expect("table created");

    let outcome = engine.evaluate_symptoms(&j1(), 0, 0).expect("evaluates");
    assert_eq!(outcome.status.id, status("quarantine"));
}

#[test]
fn tables_must_cover_each_combination_exactly_once() {
    let (engine, _, _) = build_engine();

    let mut missing = symptom_entries();
    missing.pop();
    let mut duplicated = symptom_entries();
    duplicated[3] = symptom_entry(true, false, "quarantine");
    let mut extra = symptom_entries();
    extra.push(symptom_entry(true, true, "monitor"));

    for entries in [missing, duplicated, extra, Vec::new()] {
        let table = NewSymptomTable {
            entries,
            ..county_table()
        };
        assert!(matches!(
            engine.create_symptom_table(&admin(), table),
            Err(RuleError::InvalidArgument(_))
        ));
    }
    assert!(matches!(
        engine.symptom_table(&j1()),
        Err(RuleError::NotFound { .. })
    ));
}

#[test]
fn cells_must_name_statuses_of_the_same_jurisdiction() {
    let (engine, _, _) = build_engine();
    let mut entries = symptom_entries();
    entries[0] = symptom_entry(false, false, "j2-clear");

    assert!(matches!(
        engine.create_symptom_table(
            &admin(),
            NewSymptomTable {
                entries,
                ..county_table()
            }
        ),
        Err(RuleError::InvalidReference(_))
    ));
}

#[test]
fn one_table_per_jurisdiction() {
    let (engine, _, _) = build_engine();
    engine
        .create_symptom_table(&admin(), county_table())
        .expect("first table");

    assert!(matches!(
        engine.create_symptom_table(&admin(), county_table()),
        Err(RuleError::Conflict(_))
    ));
}

#[test]
fn update_replaces_thresholds_and_entries() {
    let (engine, _, audit) = build_engine();
    let created = engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    let mut entries = symptom_entries();
    entries[0] = symptom_entry(false, false, "healthy");
    let updated = engine
        .update_symptom_table(
            &admin(),
            &created.id,
            SymptomTableChanges {
                gr1_threshold: 1,
                gr2_threshold: 1,
                entries,
            },
        )
        .expect("table updated");
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);

    let outcome = engine.evaluate_symptoms(&j1(), 1, 0).expect("evaluates");
    assert_eq!(outcome.status.id, status("monitor"));
    let outcome = engine.evaluate_symptoms(&j1(), 0, 0).expect("evaluates");
    assert_eq!(outcome.status.id, status("healthy"));

    let actions: Vec<_> = audit
        .events()
        .into_iter()
        .filter(|event| event.entity_kind == EntityKind::SymptomDecisionTable)
        .map(|event| event.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::Created, AuditAction::Updated]);
}

#[test]
fn invalid_update_keeps_previous_table() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    let result = engine.update_symptom_table(
        &admin(),
        &created.id,
        SymptomTableChanges {
            gr1_threshold: 1,
            gr2_threshold: 1,
            entries: symptom_entries().into_iter().take(2).collect(),
        },
    );
    assert!(matches!(result, Err(RuleError::InvalidArgument(_))));
    assert_eq!(engine.symptom_table(&j1()).expect("table"), created);
}

#[test]
fn evaluation_without_table_is_not_found() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    assert!(matches!(
        engine.evaluate_symptoms(&j2(), 1, 1),
        Err(RuleError::NotFound {
            kind: EntityKind::SymptomDecisionTable,
            ..
        })
    ));

    engine
        .delete_symptom_table(&admin(), &created.id)
        .expect("table deleted");
    assert!(matches!(
        engine.evaluate_symptoms(&j1(), 1, 1),
        Err(RuleError::NotFound { .. })
    ));
    assert!(matches!(
        engine.delete_symptom_table(&admin(), &created.id),
        Err(RuleError::NotFound { .. })
    ));
}

#[test]
fn table_serializes_as_its_entry_list() {
    let (engine, _, _) = build_engine();
    let created = engine
        .create_symptom_table(&admin(), county_table())
        .expect("table created");

    let value = serde_json::to_value(&created).expect("serializes");
    let entries = value["entries"].as_array().expect("entries array");
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0]["gr1"], false);
    assert_eq!(entries[0]["gr2"], false);
    assert_eq!(entries[0]["jurisdiction_status_id"], "none");
}
