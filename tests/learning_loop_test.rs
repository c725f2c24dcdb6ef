//! End-to-end tests for the learning loop: classify, strengthen, persist,
//! restart, restore.

use std::collections::{BTreeMap, HashMap};

use pattern_guard::config::LearningConfig;
use pattern_guard::learning::store::{ERROR_PATTERNS_FILE, BACKUP_FILE};
use pattern_guard::learning::{
    ErrorCategory, ErrorPattern, EventType, LearningSystem, NEW_PATTERN_MATCH_CONFIDENCE,
    NEW_PATTERN_SEED_CONFIDENCE,
};
use pattern_guard::FailureSignal;
use tempfile::TempDir;

fn open(dir: &TempDir) -> LearningSystem {
    LearningSystem::open_in(dir.path(), LearningConfig::default())
}

fn styling_signal() -> FailureSignal {
    FailureSignal::new("StylingError", "E501 line too long (120 > 100 characters)")
}

#[test]
fn test_import_error_learned_end_to_end() {
    let dir = TempDir::new().unwrap();
    let system = open(&dir);

    let result = system.match_signal(&FailureSignal::new("ImportError", "No module named 'yaml'"));

    assert!(result.pattern_id.starts_with("import_error_"));
    assert_eq!(result.confidence, NEW_PATTERN_MATCH_CONFIDENCE);
    assert!(result
        .prevention_suggestions
        .iter()
        .any(|s| s.contains("requirements.txt")));

    let stored = system.store().error_pattern(&result.pattern_id).unwrap();
    assert_eq!(stored.pattern_type, ErrorCategory::ImportError);
    assert_eq!(stored.frequency, 1);
    assert_eq!(stored.confidence, NEW_PATTERN_SEED_CONFIDENCE);

    let on_disk = std::fs::read_to_string(dir.path().join(ERROR_PATTERNS_FILE)).unwrap();
    assert!(on_disk.contains(&result.pattern_id));

    let stats = system.get_stats();
    assert_eq!(stats.patterns_learned, 1);
    assert_eq!(stats.event_type_distribution[EventType::PatternLearned.as_str()], 1);
}

#[test]
fn test_repeated_styling_signal_strengthens_one_pattern() {
    let dir = TempDir::new().unwrap();
    let system = open(&dir);

    let ids: Vec<String> = (0..3)
        .map(|_| system.match_signal(&styling_signal()).pattern_id)
        .collect();
    assert!(ids.iter().all(|id| id == &ids[0]));
    assert!(ids[0].starts_with("styling_error_"));

    let patterns = system.store().error_patterns();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].frequency, 3);
    assert!((patterns[0].confidence - 0.6).abs() < 1e-9);

    let stats = system.get_stats();
    assert_eq!(stats.patterns_learned, 1);
    assert_eq!(stats.patterns_applied, 2);
}

#[test]
fn test_confidence_converges_to_cap() {
    let dir = TempDir::new().unwrap();
    let system = open(&dir);

    let mut last = 0.0;
    for _ in 0..20 {
        let result = system.match_signal(&styling_signal());
        assert!(result.confidence <= 0.95 + 1e-9);
        last = system.store().error_pattern(&result.pattern_id).unwrap().confidence;
    }
    assert!((last - 0.95).abs() < 1e-9);

    // further sightings no longer report a strengthening step
    let before = system.get_stats().event_type_distribution[EventType::PatternStrengthened.as_str()];
    system.match_signal(&styling_signal());
    let after = system.get_stats().event_type_distribution[EventType::PatternStrengthened.as_str()];
    assert_eq!(before, after);
}

#[test]
fn test_restore_merges_snapshot_and_category_file() {
    let dir = TempDir::new().unwrap();
    {
        let system = open(&dir);
        system.match_signal(&FailureSignal::new("ImportError", "No module named 'yaml'"));
        system.match_signal(&FailureSignal::new("TypeError", "'NoneType' object has no attribute 'split'"));
        assert!(system.save_snapshot());
    }
    assert!(dir.path().join(BACKUP_FILE).exists());

    // another writer replaces the category file with a disjoint set
    let written: BTreeMap<String, ErrorPattern> = ["W291 trailing whitespace", "E111 indentation is not a multiple of four", "would reformat src/app.py"]
        .iter()
        .map(|message| {
            let pattern = ErrorPattern::from_signal(ErrorCategory::StylingError, &FailureSignal::new("lint", *message));
            (pattern.pattern_id.clone(), pattern)
        })
        .collect();
    assert_eq!(written.len(), 3);
    std::fs::write(
        dir.path().join(ERROR_PATTERNS_FILE),
        serde_json::to_string_pretty(&written).unwrap(),
    )
    .unwrap();

    let reopened = open(&dir);
    let count = reopened.store().pattern_counts().error_patterns;
    assert!(count >= written.len().max(2));
    for id in written.keys() {
        assert!(reopened.store().error_pattern(id).is_some());
    }
}

#[test]
fn test_unwritable_state_dir_still_classifies() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "plain file").unwrap();
    let system = LearningSystem::open_in(blocker.join("state"), LearningConfig::default());

    let signal = FailureSignal::new("ImportError", "No module named 'yaml'");
    let first = system.match_signal(&signal);
    assert!(first.pattern_id.starts_with("import_error_"));
    assert_eq!(first.confidence, NEW_PATTERN_MATCH_CONFIDENCE);

    let second = system.match_signal(&signal);
    assert_eq!(second.pattern_id, first.pattern_id);
    assert!((second.confidence - (NEW_PATTERN_SEED_CONFIDENCE + 0.05)).abs() < 1e-9);

    let stored = system.store().error_pattern(&first.pattern_id).unwrap();
    assert_eq!(stored.frequency, 2);
    assert_eq!(system.get_stats().patterns_learned, 1);
    assert!(!system.save_snapshot());
}

#[test]
fn test_counters_survive_restart() {
    let dir = TempDir::new().unwrap();
    let before = {
        let system = open(&dir);
        system.match_signal(&styling_signal());
        system.match_signal(&styling_signal());
        system.observe_command("pytest -q", false, &HashMap::new());
        system.get_stats()
    };

    let reopened = open(&dir);
    let after = reopened.get_stats();
    assert_eq!(after.patterns_learned, before.patterns_learned);
    assert_eq!(after.patterns_applied, before.patterns_applied);
    assert_eq!(after.total_learning_events, before.total_learning_events);
    assert_eq!(reopened.store().command_history().len(), 1);
}

#[test]
fn test_get_stats_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let system = open(&dir);
    system.match_signal(&styling_signal());
    system.record_learning_event("manual_review", serde_json::json!({ "note": "checked" }));

    let first = system.get_stats();
    let second = system.get_stats();
    assert_eq!(first, second);
    assert_eq!(first.event_type_distribution["manual_review"], 1);
}

#[test]
fn test_same_inputs_same_patterns() {
    let signals = [
        FailureSignal::new("ImportError", "No module named 'requests'"),
        FailureSignal::new("TypeError", "unsupported operand type(s) for +: 'int' and 'str'"),
        FailureSignal::new("ImportError", "No module named 'requests'"),
        FailureSignal::new("CliError", "error: unrecognized arguments: --fast"),
    ];

    let run = || {
        let dir = TempDir::new().unwrap();
        let system = open(&dir);
        signals
            .iter()
            .map(|s| {
                let result = system.match_signal(s);
                (result.pattern_id, result.confidence)
            })
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_unknown_failure_is_not_learned() {
    let dir = TempDir::new().unwrap();
    let system = open(&dir);
    let result = system.match_signal(&FailureSignal::new("Panic", "segmentation fault"));
    assert!(result.is_unknown());
    assert!(system.store().error_patterns().is_empty());
    assert_eq!(system.get_stats().patterns_learned, 0);
}
