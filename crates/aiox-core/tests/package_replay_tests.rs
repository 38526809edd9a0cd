mod common;

use std::fs;
use std::time::Duration;

use aiox_core::{undo_last_run, ArtifactOutcome, AutoApprove, CoreEngineError, ExecutionOptions, InMemoryTxStore,
                Package, Packager, Plan, PlanExecutor, ReplayVerifier, RunStatus, Sandbox, Tool, ToolContext, ToolInputs,
                ToolManifest, ToolOutput, ToolRegistry, TxEntryKind, TxStore, Verdict};

use common::{registry, sandbox, WriteText};

const PLAN: &str = r#"{
    "goal": "copy greeting",
    "capabilities": ["fs.read@in", "fs.write@out"],
    "steps": [
        {"op": "read_text", "in": {"path": "in/greeting.txt"}, "out": "text"},
        {"op": "write_text", "in": {"path": "out/copy.txt", "text": {"$ref": "text"}}}
    ]}"#;

/// Sandbox con input, un run completado del plan y su store.
fn executed(dir: &std::path::Path) -> (Plan, Sandbox, InMemoryTxStore) {
    let sb = sandbox(dir);
    fs::write(sb.root().join("in/greeting.txt"), "hola").unwrap();
    let plan = Plan::from_json_str(PLAN).unwrap();
    let mut exec = PlanExecutor::builder(InMemoryTxStore::new(), registry()).policy(AutoApprove).build();
    let report = exec.execute(&plan, &sb).unwrap();
    assert!(report.is_completed(), "{:?}", report.failure);
    (plan, sb, exec.into_store())
}

#[test]
fn packaging_is_deterministic_and_content_addressed() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let reg = registry();

    let first = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    let second = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap(), "same state must give identical bytes");
    assert!(first.files.contains_key("in/greeting.txt"));
    assert_eq!(first.manifest.expected_artifacts.len(), 1);
    assert_eq!(first.manifest.expected_artifacts[0].path, "out/copy.txt");
    assert!(first.manifest.expected_fingerprint.is_some());
    let tool_names: Vec<&str> = first.manifest.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tool_names, vec!["read_text", "write_text"]);

    fs::write(sb.root().join("in/greeting.txt"), "holb").unwrap();
    let changed = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    assert_ne!(changed.id, first.id, "a one-byte input change must change the package id");
}

#[test]
fn package_without_completed_run_has_no_expectations() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    fs::write(sb.root().join("in/greeting.txt"), "hola").unwrap();
    let plan = Plan::from_json_str(PLAN).unwrap();
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, &InMemoryTxStore::new()).unwrap();
    assert!(pkg.manifest.expected_artifacts.is_empty());
    assert!(pkg.manifest.expected_fingerprint.is_none());
}

#[test]
fn changed_inputs_do_not_inherit_expectations_of_an_older_run() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let reg = registry();
    let run = store.run_ids().unwrap()[0];
    let TxEntryKind::RunStart { inputs_digest, .. } = &store.list(run).unwrap()[0].kind else {
        panic!("la primera entrada debe ser run_start");
    };
    assert!(inputs_digest.as_deref().is_some_and(|d| d.starts_with("sha256:")), "{inputs_digest:?}");

    fs::write(sb.root().join("in/greeting.txt"), "adios").unwrap();
    let stale = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    assert!(stale.manifest.expected_artifacts.is_empty(), "el run vio otro in/");
    assert!(stale.manifest.expected_fingerprint.is_none());

    fs::write(sb.root().join("in/greeting.txt"), "hola").unwrap();
    let fresh = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    assert_eq!(fresh.manifest.expected_artifacts.len(), 1);
    assert!(fresh.manifest.expected_fingerprint.is_some());
}

#[test]
fn written_package_reads_back_and_rejects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();

    let path = pkg.write_to(&sb.packages_dir()).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("copy-greeting-"), "{name}");
    assert!(name.ends_with(&format!("{}.aiox", pkg.short_id())));
    let back = Package::read(&path).unwrap();
    assert_eq!(back, pkg);

    let mut tampered = pkg.clone();
    tampered.files.insert("in/greeting.txt".into(), b"adios".to_vec());
    let err = tampered.verify().unwrap_err();
    assert!(matches!(err, CoreEngineError::PackageIntegrity { .. }));
    let bytes = tampered.to_bytes().unwrap();
    assert!(matches!(Package::from_reader(&bytes[..]), Err(CoreEngineError::PackageIntegrity { .. })));

    let renamed = path.with_file_name("copy-greeting-000000000000.aiox");
    fs::copy(&path, &renamed).unwrap();
    assert!(matches!(Package::read(&renamed), Err(CoreEngineError::PackageIntegrity { .. })));
}

#[test]
fn replay_in_fresh_sandbox_passes() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();

    let fresh = Sandbox::create_fresh(&dir.path().join("fresh")).unwrap();
    let mut replay_store = InMemoryTxStore::new();
    let report = ReplayVerifier::new(&reg).replay(&pkg, &fresh, &mut replay_store).unwrap();

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.run_status, RunStatus::Completed);
    assert_eq!(report.check("out/copy.txt").unwrap().outcome, ArtifactOutcome::Match);
    assert_eq!(report.fingerprint_matched, Some(true));
    assert_eq!(fs::read_to_string(fresh.root().join("out/copy.txt")).unwrap(), "hola");
    assert_eq!(replay_store.run_ids().unwrap(), vec![report.run_id]);
}

#[test]
fn replay_with_drifted_tool_fails_with_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let pkg = Packager::new(&registry()).pack(&plan, &sb, &store).unwrap();

    let drifted: ToolRegistry = registry().with(WriteText { suffix: "!" });
    let fresh = Sandbox::create_fresh(&dir.path().join("fresh")).unwrap();
    let report = ReplayVerifier::new(&drifted).replay(&pkg, &fresh, InMemoryTxStore::new()).unwrap();

    assert_eq!(report.verdict, Verdict::Fail);
    let check = report.check("out/copy.txt").unwrap();
    assert_eq!(check.outcome, ArtifactOutcome::Mismatch);
    assert_ne!(check.actual.as_deref(), Some(check.expected.as_str()));
}

/// `echo` que falla siempre: simula un step final no reproducible.
struct FlakyEcho;

impl Tool for FlakyEcho {
    fn manifest(&self) -> ToolManifest {
        ToolManifest::new("echo", "1.0").input("value")
    }

    fn invoke(&self, _inputs: &ToolInputs, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput, CoreEngineError> {
        Err(CoreEngineError::tool("echo", "upstream changed"))
    }
}

#[test]
fn replay_fails_when_a_later_step_aborts_even_if_artifacts_match() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let plan = Plan::from_json_str(r#"{"goal": "write then echo", "capabilities": ["fs.write@out"],
        "steps": [{"op": "write_text", "in": {"path": "out/a.txt", "text": "fixed"}},
                  {"op": "echo", "in": {"value": 1}}]}"#).unwrap();
    let mut exec = PlanExecutor::builder(InMemoryTxStore::new(), registry()).policy(AutoApprove).build();
    assert!(exec.execute(&plan, &sb).unwrap().is_completed());
    let pkg = Packager::new(&registry()).pack(&plan, &sb, exec.store()).unwrap();
    assert_eq!(pkg.manifest.expected_artifacts.len(), 1);

    let flaky = registry().with(FlakyEcho);
    let fresh = Sandbox::create_fresh(&dir.path().join("fresh")).unwrap();
    let report = ReplayVerifier::new(&flaky).replay(&pkg, &fresh, InMemoryTxStore::new()).unwrap();
    assert_eq!(report.run_status, RunStatus::Aborted);
    assert_eq!(report.check("out/a.txt").unwrap().outcome,
               ArtifactOutcome::Match,
               "el artifact se reescribió igual antes del fallo");
    assert_eq!(report.verdict, Verdict::Fail, "un run abortado no puede dar PASS");
}

#[test]
fn replay_reports_missing_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let pkg = Packager::new(&registry()).pack(&plan, &sb, &store).unwrap();

    // Sin write_text el plan no valida, así que el run aborta y el artifact falta.
    let partial = ToolRegistry::new().with(common::ReadText).with(common::Fail);
    let fresh = Sandbox::create_fresh(&dir.path().join("fresh")).unwrap();
    let report = ReplayVerifier::new(&partial).replay(&pkg, &fresh, InMemoryTxStore::new()).unwrap();
    assert_eq!(report.run_status, RunStatus::Aborted);
    assert_eq!(report.check("out/copy.txt").unwrap().outcome, ArtifactOutcome::Missing);
    assert!(!report.passed());
}

#[test]
fn replay_refuses_a_used_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, sb, store) = executed(dir.path());
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, &store).unwrap();
    let err = ReplayVerifier::new(&reg).replay(&pkg, &sb, InMemoryTxStore::new()).unwrap_err();
    assert!(matches!(err, CoreEngineError::SandboxLayout(_)));
}

#[test]
fn replay_denies_nondeterministic_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let plan = Plan::from_json_str(r#"{"goal": "g", "capabilities": ["clock.read"],
        "steps": [{"op": "echo", "in": {"value": 1}}]}"#).unwrap();
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, &InMemoryTxStore::new()).unwrap();

    let fresh = Sandbox::create_fresh(&dir.path().join("fresh")).unwrap();
    let report = ReplayVerifier::new(&reg).replay(&pkg, &fresh, InMemoryTxStore::new()).unwrap();
    assert_eq!(report.run_status, RunStatus::Aborted);
    assert_eq!(report.verdict, Verdict::Fail);
}

#[test]
fn undo_removes_files_created_by_the_last_run() {
    let dir = tempfile::tempdir().unwrap();
    let (_plan, sb, mut store) = executed(dir.path());
    let copy = sb.root().join("out/copy.txt");
    assert!(copy.exists());

    let report = undo_last_run(&sb, &mut store, Duration::from_millis(200)).unwrap();
    assert!(report.reverted_run.is_some());
    assert_eq!(report.removed, vec!["out/copy.txt".to_string()]);
    assert!(!copy.exists());
    assert!(sb.root().join("in/greeting.txt").exists(), "inputs are never touched");

    let again = undo_last_run(&sb, &mut store, Duration::from_millis(200)).unwrap();
    assert!(again.reverted_run.is_none(), "a reverted run is not reverted twice");
}

#[test]
fn undo_keeps_files_modified_after_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (_plan, sb, mut store) = executed(dir.path());
    let copy = sb.root().join("out/copy.txt");
    fs::write(&copy, "edited by hand").unwrap();

    let report = undo_last_run(&sb, &mut store, Duration::from_millis(200)).unwrap();
    assert_eq!(report.skipped, vec!["out/copy.txt".to_string()]);
    assert!(report.removed.is_empty());
    assert!(copy.exists());
}

#[test]
fn undo_moves_past_a_run_whose_files_were_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let (_plan, sb, mut store) = executed(dir.path());
    let second = Plan::from_json_str(r#"{"goal": "note", "capabilities": ["fs.write@out"],
        "steps": [{"op": "write_text", "in": {"path": "out/note.txt", "text": "v1"}}]}"#).unwrap();
    let later = {
        let mut exec = PlanExecutor::builder(&mut store, registry()).policy(AutoApprove).build();
        exec.execute(&second, &sb).unwrap()
    };
    assert!(later.is_completed());
    fs::write(sb.root().join("out/note.txt"), "v2").unwrap();

    let first = undo_last_run(&sb, &mut store, Duration::from_millis(200)).unwrap();
    assert_eq!(first.reverted_run, Some(later.run_id));
    assert_eq!(first.skipped, vec!["out/note.txt".to_string()]);
    let entries = store.list(first.undo_run_id).unwrap();
    assert!(matches!(&entries[..],
                     [e] if matches!(&e.kind, TxEntryKind::ArtifactReverted { kept: true, .. })),
            "{entries:?}");

    let next = undo_last_run(&sb, &mut store, Duration::from_millis(200)).unwrap();
    assert_ne!(next.reverted_run, Some(later.run_id), "el run ya revertido no se elige otra vez");
    assert_eq!(next.removed, vec!["out/copy.txt".to_string()]);
    assert!(sb.root().join("out/note.txt").exists());
    assert!(!sb.root().join("out/copy.txt").exists());
}

#[test]
fn dry_runs_are_not_packaged_as_expectations() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    fs::write(sb.root().join("in/greeting.txt"), "hola").unwrap();
    let plan = Plan::from_json_str(PLAN).unwrap();
    let mut exec = PlanExecutor::builder(InMemoryTxStore::new(), registry())
        .policy(AutoApprove)
        .options(ExecutionOptions::default().dry_run(true))
        .build();
    exec.execute(&plan, &sb).unwrap();
    let reg = registry();
    let pkg = Packager::new(&reg).pack(&plan, &sb, exec.store()).unwrap();
    assert!(pkg.manifest.expected_artifacts.is_empty());
}
