use std::fs::{self, OpenOptions};
use std::io::Write;

use aiox_core::constants::{TX_INDEX_FILE, TX_LOG_FILE};
use aiox_core::{latest_completed_run, load_runs, AutoApprove, Capability, GrantDecision, InMemoryTxStore, Plan, PlanExecutor,
                RunStatus, Sandbox, ToolRegistry, TxEntryKind, TxStore};
use aiox_persistence::{JsonlTxStore, RunIndex};
use uuid::Uuid;

fn check(name: &str) -> TxEntryKind {
    TxEntryKind::CapabilityCheck { capability: Capability::new(name),
                                   decision: GrantDecision::Granted,
                                   policy: "test".into() }
}

fn run_end() -> TxEntryKind {
    TxEntryKind::RunEnd { status: RunStatus::Completed,
                          failed_step: None,
                          error: None,
                          artifacts: Vec::new(),
                          totals: Default::default(),
                          fingerprint: None }
}

fn sandbox(dir: &std::path::Path) -> Sandbox {
    Sandbox::create(&dir.join("sb"), false).unwrap()
}

#[test]
fn jsonl_matches_in_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let mut durable = JsonlTxStore::open(&sb).unwrap();
    let mut memory = InMemoryTxStore::new();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    for (run, kind) in [(a, check("fs.read")), (b, check("fs.write")), (a, run_end()), (b, run_end())] {
        let d = durable.append(run, kind.clone()).unwrap();
        let m = memory.append(run, kind).unwrap();
        assert_eq!(d.seq, m.seq);
        assert_eq!(d.kind, m.kind);
    }
    assert_eq!(durable.run_ids().unwrap(), memory.run_ids().unwrap());
    let kinds = |s: &dyn TxStore, r| s.list(r).unwrap().into_iter().map(|e| (e.seq, e.kind)).collect::<Vec<_>>();
    assert_eq!(kinds(&durable, a), kinds(&memory, a));
    assert_eq!(kinds(&durable, b), kinds(&memory, b));
}

#[test]
fn reopening_keeps_entries_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let run = Uuid::new_v4();
    {
        let mut store = JsonlTxStore::open(&sb).unwrap().with_fsync(false);
        store.append(run, check("fs.read")).unwrap();
        store.append(run, run_end()).unwrap();
    }
    assert!(sb.root().join(TX_INDEX_FILE).exists(), "index is persisted at run_end");

    let mut store = JsonlTxStore::open(&sb).unwrap();
    assert_eq!(store.run_ids().unwrap(), vec![run]);
    let next = store.append(Uuid::new_v4(), check("fs.read")).unwrap();
    assert_eq!(next.seq, 2);
    assert_eq!(store.list(run).unwrap().len(), 2);
}

#[test]
fn two_handles_on_one_sandbox_see_each_others_runs() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    // Ambos abren antes de que exista ningún run, como dos procesos del CLI.
    let first = JsonlTxStore::open(&sb).unwrap().with_fsync(false);
    let mut second = JsonlTxStore::open(&sb).unwrap().with_fsync(false);
    let plan = Plan::new("noop");

    let mut exec_a = PlanExecutor::builder(first, ToolRegistry::new()).policy(AutoApprove).build();
    let run_a = exec_a.execute(&plan, &sb).unwrap();
    assert!(run_a.is_completed());

    let run_b = {
        let mut exec_b = PlanExecutor::builder(&mut second, ToolRegistry::new()).policy(AutoApprove).build();
        exec_b.execute(&plan, &sb).unwrap()
    };
    assert!(run_b.is_completed());
    assert!(!second.list(run_b.run_id).unwrap().is_empty(), "el span de run_b apunta a sus propias líneas");
    assert_eq!(second.run_ids().unwrap(), vec![run_a.run_id, run_b.run_id]);
    let latest = latest_completed_run(&second, &plan.plan_id()).unwrap().unwrap();
    assert_eq!(latest.run_id, run_b.run_id);

    let reopened = JsonlTxStore::open(&sb).unwrap();
    let seqs: Vec<u64> = reopened.run_ids()
                                 .unwrap()
                                 .into_iter()
                                 .flat_map(|r| reopened.list(r).unwrap())
                                 .map(|e| e.seq)
                                 .collect();
    let expected: Vec<u64> = (0..seqs.len() as u64).collect();
    assert_eq!(seqs, expected, "seq global sin duplicados entre handles");
}

#[test]
fn stale_index_is_rebuilt_from_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    {
        let mut store = JsonlTxStore::open(&sb).unwrap();
        store.append(a, run_end()).unwrap();
        // sin run_end: el índice persistido queda detrás del log
        store.append(b, check("fs.read")).unwrap();
    }
    let persisted = RunIndex::load(&sb.root().join(TX_INDEX_FILE)).unwrap();
    assert_eq!(persisted.runs.len(), 1);

    let store = JsonlTxStore::open(&sb).unwrap();
    assert_eq!(store.run_ids().unwrap(), vec![a, b]);
    assert_eq!(store.index().log_len, fs::metadata(sb.root().join(TX_LOG_FILE)).unwrap().len());
}

#[test]
fn partial_trailing_line_is_skipped_and_next_append_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let run = Uuid::new_v4();
    {
        let mut store = JsonlTxStore::open(&sb).unwrap();
        store.append(run, check("fs.read")).unwrap();
    }
    let log = sb.root().join(TX_LOG_FILE);
    OpenOptions::new().append(true).open(&log).unwrap().write_all(br#"{"seq":1,"ts":"20"#).unwrap();

    let mut store = JsonlTxStore::open(&sb).unwrap();
    assert_eq!(store.list(run).unwrap().len(), 1);
    store.append(run, run_end()).unwrap();

    let reopened = JsonlTxStore::open(&sb).unwrap();
    let entries = reopened.list(run).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].kind.is_run_end());
    let text = fs::read_to_string(&log).unwrap();
    assert!(text.ends_with('\n'));
    assert_eq!(text.lines().count(), 3, "the torn line stays in the log, isolated on its own line");
}

#[test]
fn runs_fold_from_the_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let sb = sandbox(dir.path());
    let run = Uuid::new_v4();
    let mut store = JsonlTxStore::open(&sb).unwrap();
    store.append(run,
                 TxEntryKind::RunStart { plan_id: "sha256:abc".into(),
                                         goal: "g".into(),
                                         step_count: 0,
                                         engine_version: "K1.0".into(),
                                         dry_run: false,
                                         replay: false,
                                         inputs_digest: None })
         .unwrap();
    store.append(run, run_end()).unwrap();
    let runs = load_runs(&store).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].is_completed());
}

#[test]
fn unwritable_log_surfaces_as_log_write() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("logs");
    fs::create_dir_all(&log).unwrap();
    // El directorio del índice no existe: persistirlo en run_end falla.
    let mut store = JsonlTxStore::open_at(&log.join("tx.jsonl"), &dir.path().join("missing/tx.index.json")).unwrap();
    let err = store.append(Uuid::new_v4(), run_end()).unwrap_err();
    assert!(matches!(err, aiox_core::CoreEngineError::LogWrite(_)), "{err:?}");
}
