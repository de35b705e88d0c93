use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use status_rules::engine::{
    AccessDecision, AccessRuleEntry, AppVersion, CatalogSeed, EngineConfig, InMemoryAuditLog,
    InMemoryRuleStore, JurisdictionId, MutationContext, NewAccessRule, NewRule, NewSymptomTable,
    ResultStatusMapping, RuleChanges, RuleEngine, StatusId, StatusResolution,
    SymptomDecisionEntry, TestResultId, TestSignal, TestTypeId,
};
use status_rules::error::AppError;

use crate::infra::load_seed;

type DemoEngine = RuleEngine<InMemoryRuleStore, InMemoryAuditLog>;

const DEMO_SEED: &str = r#"{
    "jurisdictions": [
        {
            "id": "J1",
            "name": "Polk County",
            "region": "IA",
            "country": "US",
            "statuses": [
                { "id": "healthy", "name": "Healthy", "description": "No restrictions" },
                { "id": "quarantine", "name": "Quarantine", "description": "Stay home" },
                { "id": "monitor", "name": "Monitor", "description": "Watch for symptoms" },
                { "id": "none", "name": "No symptoms" }
            ]
        }
    ],
    "test_types": [
        {
            "id": "PCR",
            "name": "PCR",
            "priority": 1,
            "results": [
                { "id": "positive", "name": "Positive", "next_step": "Isolate for ten days" },
                { "id": "negative", "name": "Negative" }
            ]
        }
    ]
}"#;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print the audit trail recorded during the demo as JSON lines.
    #[arg(long)]
    pub(crate) audit: bool,
}

#[derive(Args, Debug)]
pub(crate) struct CheckSeedArgs {
    /// Catalog seed file (JSON)
    pub(crate) path: PathBuf,
}

fn demo_engine() -> (DemoEngine, Arc<InMemoryAuditLog>) {
    let audit = Arc::new(InMemoryAuditLog::default());
    let engine = RuleEngine::new(
        Arc::new(InMemoryRuleStore::new()),
        audit.clone(),
        EngineConfig::default(),
    );
    (engine, audit)
}

pub(crate) fn run_check_seed(args: CheckSeedArgs) -> Result<(), AppError> {
    let (engine, _) = demo_engine();
    let summary = load_seed(&engine, &args.path)?;

    println!("Catalog seed {} is valid", args.path.display());
    println!("  Jurisdictions: {}", summary.jurisdictions);
    println!("  Statuses: {}", summary.statuses);
    println!("  Test types: {}", summary.test_types);
    println!("  Test results: {}", summary.results);
    Ok(())
}

fn describe(resolution: &StatusResolution) -> String {
    match resolution {
        StatusResolution::Resolved(resolved) => {
            let mut line = format!(
                "{} (rule {}, priority {})",
                resolved.status.name,
                resolved.winner.rule_id,
                resolved
                    .winner
                    .priority
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unset".to_string())
            );
            if let Some(step) = &resolved.next_step {
                line.push_str(&format!("; next step: {}", step.text));
            }
            line
        }
        StatusResolution::NoStatus => "no status".to_string(),
    }
}

fn mapping(result: &str, status: &str) -> ResultStatusMapping {
    ResultStatusMapping {
        test_type_result_id: TestResultId::new(result),
        jurisdiction_status_id: StatusId::new(status),
    }
}

fn symptom_entry(gr1: bool, gr2: bool, status: &str, next_step: &str) -> SymptomDecisionEntry {
    SymptomDecisionEntry {
        gr1,
        gr2,
        jurisdiction_status_id: StatusId::new(status),
        next_step: next_step.to_string(),
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let (engine, audit) = demo_engine();
    let ctx = MutationContext::new("demo@status-rules").with_annotation("cli demo");
    let jurisdiction = JurisdictionId::new("J1");

    let summary = engine.load_catalog(CatalogSeed::from_json(DEMO_SEED)?)?;
    println!("Status rule engine demo");
    println!(
        "Catalog: {} jurisdiction(s), {} status(es), {} test type(s)",
        summary.jurisdictions, summary.statuses, summary.test_types
    );

    println!("\nResult mapping");
    let rule = engine.create_rule(
        &ctx,
        NewRule {
            jurisdiction_id: jurisdiction.clone(),
            test_type_id: TestTypeId::new("PCR"),
            priority: Some(1),
            mappings: vec![
                mapping("positive", "quarantine"),
                mapping("negative", "healthy"),
            ],
        },
    )?;
    let positive = [TestSignal::new("PCR", "positive")];
    let before = engine.resolve_status(&jurisdiction, &positive)?;
    println!("  PCR positive -> {}", describe(&before));

    engine.update_rule(
        &ctx,
        &rule.rule.id,
        RuleChanges {
            priority: Some(1),
            mappings: vec![mapping("positive", "monitor"), mapping("negative", "healthy")],
        },
    )?;
    let after = engine.resolve_status(&jurisdiction, &positive)?;
    println!("  After remapping, PCR positive -> {}", describe(&after));

    println!("\nSymptom evaluation (thresholds: group 1 >= 3, group 2 >= 2)");
    engine.create_symptom_table(
        &ctx,
        NewSymptomTable {
            jurisdiction_id: jurisdiction.clone(),
            gr1_threshold: 3,
            gr2_threshold: 2,
            entries: vec![
                symptom_entry(false, false, "none", "No action needed"),
                symptom_entry(true, false, "monitor", "Check symptoms daily"),
                symptom_entry(false, true, "monitor", "Check symptoms daily"),
                symptom_entry(true, true, "quarantine", "Stay home and book a test"),
            ],
        },
    )?;
    for (gr1, gr2) in [(3, 1), (0, 0), (4, 2)] {
        let outcome = engine.evaluate_symptoms(&jurisdiction, gr1, gr2)?;
        println!(
            "  {gr1} group-1 / {gr2} group-2 symptoms -> {} ({})",
            outcome.status.name, outcome.next_step
        );
    }

    println!("\nAccess");
    engine.create_access_rule(
        &ctx,
        NewAccessRule {
            jurisdiction_id: jurisdiction.clone(),
            entries: vec![
                AccessRuleEntry {
                    jurisdiction_status_id: StatusId::new("healthy"),
                    decision: AccessDecision::Granted,
                },
                AccessRuleEntry {
                    jurisdiction_status_id: StatusId::new("quarantine"),
                    decision: AccessDecision::Denied,
                },
            ],
        },
    )?;
    for signals in [
        vec![TestSignal::new("PCR", "negative")],
        vec![TestSignal::new("PCR", "positive")],
        Vec::new(),
    ] {
        let assessment = engine.assess(&jurisdiction, &signals)?;
        println!(
            "  {} signal(s) -> {} / access {:?}",
            signals.len(),
            describe(&assessment.resolution),
            assessment.access
        );
    }

    println!("\nRuleset distribution");
    let version = AppVersion::parse("1.4.0")?;
    let write = engine.put_document(
        &ctx,
        &jurisdiction,
        version.clone(),
        r#"{"rules":"polk-county-2024"}"#.to_string(),
    )?;
    println!(
        "  Published ruleset for app {} (replaced existing: {})",
        write.document.app_version, write.replaced
    );
    let fetched = engine.document(&jurisdiction, &version)?;
    println!(
        "  Fetched {} bytes, last updated {}",
        fetched.payload.len(),
        fetched.last_updated.to_rfc3339()
    );

    let events = audit.events();
    println!("\nAudit trail: {} change(s) recorded", events.len());
    if args.audit {
        for event in events {
            let line = serde_json::to_string(&event).map_err(std::io::Error::from)?;
            println!("{line}");
        }
    }

    Ok(())
}
