use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;
use std::time::Duration;

use aiox_core::constants::POLICY_FILE;
use aiox_core::{load_runs, undo_last_run, ApprovalPolicy, ArtifactOutcome, AutoApprove, CapabilityRequest, CoreEngineError,
                GrantDecision, InteractivePrompt, Package, Packager, Plan, PlanExecutor, ReplayVerifier, RunReport,
                Sandbox, StaticAllowList, StepStatus};
use aiox_persistence::{JsonlTxStore, KernelConfig};
use aiox_tools::builtin_registry;
use log::error;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_INFRA: i32 = 5;

const USAGE: &str = "Uso:
  aiox run <plan.json> [--dry-run] [--yes]
  aiox pack <plan.json>
  aiox replay <pkg.aiox> <fresh-root>
  aiox undo
  aiox runs";

fn main() {
    // Cargar .env si existe para obtener AIOX_*
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                                                  tracing_subscriber::EnvFilter::new("info")
                                              }))
                             .with_writer(io::stderr)
                             .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match KernelConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[aiox] configuración inválida: {e}");
            exit(EXIT_USAGE);
        }
    };
    let code = match args.first().map(String::as_str) {
        Some("run") => cmd_run(&config, &args[1..]),
        Some("pack") => cmd_pack(&config, &args[1..]),
        Some("replay") => cmd_replay(&config, &args[1..]),
        Some("undo") if args.len() == 1 => cmd_undo(&config),
        Some("runs") if args.len() == 1 => cmd_runs(&config),
        _ => usage(),
    };
    exit(code);
}

fn usage() -> i32 {
    eprintln!("{USAGE}");
    EXIT_USAGE
}

fn infra(context: &str, err: impl std::fmt::Display) -> i32 {
    error!("{context}: {err}");
    eprintln!("[aiox] {context}: {err}");
    EXIT_INFRA
}

/// `policy.json` primero; lo que no cubre se pregunta al operador por
/// stdin/stderr.
struct OperatorPolicy<R, W> {
    allow: StaticAllowList,
    prompt: InteractivePrompt<R, W>,
}

impl<R: BufRead, W: Write> ApprovalPolicy for OperatorPolicy<R, W> {
    fn name(&self) -> &str {
        "operator"
    }

    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision {
        match self.allow.decide(request) {
            GrantDecision::Granted => GrantDecision::Granted,
            GrantDecision::Denied => self.prompt.decide(request),
        }
    }
}

fn load_plan(path: &str) -> Result<Plan, i32> {
    Plan::from_path(Path::new(path)).map_err(|e| {
                                        eprintln!("[aiox] plan inválido {path}: {e}");
                                        EXIT_USAGE
                                    })
}

fn open_sandbox(config: &KernelConfig) -> Result<(Sandbox, JsonlTxStore), i32> {
    let sandbox = Sandbox::create(&config.sandbox_root, false).map_err(|e| infra("sandbox", e))?;
    let store = JsonlTxStore::open(&sandbox).map_err(|e| infra("tx log", e))?
                                            .with_fsync(config.log_fsync);
    Ok((sandbox, store))
}

fn cmd_run(config: &KernelConfig, args: &[String]) -> i32 {
    let mut plan_path: Option<&str> = None;
    let mut dry_run = false;
    let mut yes = config.auto_approve;
    for arg in args {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--yes" => yes = true,
            other if other.starts_with("--") => return usage(),
            other if plan_path.is_none() => plan_path = Some(other),
            _ => return usage(),
        }
    }
    let Some(plan_path) = plan_path else {
        return usage();
    };
    let plan = match load_plan(plan_path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let (sandbox, store) = match open_sandbox(config) {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    let builder = PlanExecutor::builder(store, builtin_registry()).options(config.execution_options().dry_run(dry_run));
    let builder = if yes {
        builder.policy(AutoApprove)
    } else {
        let allow = match StaticAllowList::from_policy_file(&sandbox.root().join(POLICY_FILE)) {
            Ok(a) => a,
            Err(e) => return infra("policy", e),
        };
        builder.policy(OperatorPolicy { allow,
                                        prompt: InteractivePrompt::new(io::stdin().lock(), io::stderr()) })
    };
    let mut executor = builder.build();
    match executor.execute(&plan, &sandbox) {
        Ok(report) => {
            print_report(&report);
            if report.is_completed() {
                EXIT_OK
            } else {
                EXIT_FAILED
            }
        }
        Err(e @ CoreEngineError::SandboxBusy(_)) => infra("sandbox busy", e),
        Err(e) => infra("run", e),
    }
}

fn print_report(report: &RunReport) {
    for step in &report.steps {
        let marker = match step.status {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "skipped",
            StepStatus::Pending => "not started",
            StepStatus::Running => "running",
        };
        println!("  [{marker}] {}", step.step_id);
        if let Some(err) = &step.error {
            println!("      {err}");
        }
    }
    for artifact in &report.artifacts {
        println!("  wrote {} {}", artifact.path, artifact.sha256);
    }
    if let Some(failure) = &report.failure {
        if failure.step_id.is_none() {
            println!("  aborted: {}", failure.error);
        }
    }
    println!("run {} {} (cost {} USD, carbon {} g, tokens {})",
             report.run_id,
             report.status.as_str(),
             report.totals.cost_usd,
             report.totals.carbon_g,
             report.totals.tokens);
    if let Some(fp) = &report.fingerprint {
        println!("fingerprint {fp}");
    }
}

fn cmd_pack(config: &KernelConfig, args: &[String]) -> i32 {
    let [plan_path] = args else {
        return usage();
    };
    let plan = match load_plan(plan_path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let (sandbox, store) = match open_sandbox(config) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let registry = builtin_registry();
    let package = match Packager::new(&registry).pack(&plan, &sandbox, &store) {
        Ok(p) => p,
        Err(e) => return infra("pack", e),
    };
    match package.write_to(&sandbox.packages_dir()) {
        Ok(path) => {
            println!("{}", package.id);
            println!("{}", path.display());
            if package.manifest.expected_artifacts.is_empty() {
                println!("warning: no completed run of this plan over the current in/; the package carries no expected artifacts");
            }
            EXIT_OK
        }
        Err(e) => infra("pack", e),
    }
}

fn cmd_replay(config: &KernelConfig, args: &[String]) -> i32 {
    let [package_path, fresh_root] = args else {
        return usage();
    };
    let package = match Package::read(Path::new(package_path)) {
        Ok(p) => p,
        Err(e) => return infra("package", e),
    };
    let sandbox = match Sandbox::create_fresh(Path::new(fresh_root)) {
        Ok(s) => s,
        Err(e) => return infra("sandbox", e),
    };
    let store = match JsonlTxStore::open(&sandbox) {
        Ok(s) => s.with_fsync(config.log_fsync),
        Err(e) => return infra("tx log", e),
    };
    let registry = builtin_registry();
    let verifier = ReplayVerifier::new(&registry).with_options(config.execution_options());
    match verifier.replay(&package, &sandbox, store) {
        Ok(report) => {
            for check in &report.artifacts {
                let outcome = match check.outcome {
                    ArtifactOutcome::Match => "match",
                    ArtifactOutcome::Mismatch => "mismatch",
                    ArtifactOutcome::Missing => "missing",
                };
                println!("  {outcome} {} expected {} got {}",
                         check.path,
                         check.expected,
                         check.actual.as_deref().unwrap_or("-"));
            }
            println!("replay {} run {}: {}",
                     report.package_id,
                     report.run_status.as_str(),
                     report.verdict.as_str());
            if report.passed() {
                EXIT_OK
            } else {
                EXIT_FAILED
            }
        }
        Err(e) => infra("replay", e),
    }
}

fn cmd_undo(config: &KernelConfig) -> i32 {
    let (sandbox, mut store) = match open_sandbox(config) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match undo_last_run(&sandbox, &mut store, Duration::from_millis(config.lock_timeout_ms)) {
        Ok(report) => {
            match report.reverted_run {
                Some(run) => println!("reverted run {run}"),
                None => println!("nothing to undo"),
            }
            for path in &report.removed {
                println!("  removed {path}");
            }
            for path in &report.skipped {
                println!("  kept {path} (modified after the run)");
            }
            EXIT_OK
        }
        Err(e) => infra("undo", e),
    }
}

fn cmd_runs(config: &KernelConfig) -> i32 {
    let (_sandbox, store) = match open_sandbox(config) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match load_runs(&store) {
        Ok(runs) => {
            for run in runs {
                let mut flags = Vec::new();
                if run.dry_run {
                    flags.push("dry-run");
                }
                if run.replay {
                    flags.push("replay");
                }
                if run.reverted {
                    flags.push("reverted");
                }
                println!("{} {} {} {} {}",
                         run.run_id,
                         run.started_at.to_rfc3339(),
                         run.status.as_str(),
                         run.goal,
                         flags.join(","));
            }
            EXIT_OK
        }
        Err(e) => infra("runs", e),
    }
}
