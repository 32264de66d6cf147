//! Subprocess invocation abstraction.
//!
//! Every caller that needs to shell out to an external tool goes through the
//! [`Runner`] trait instead of touching [`std::process::Command`] directly.
//! This is the single seam that lets the reconciliation-heavy drivers built
//! on top of this crate be exercised in tests without any of the real
//! tooling (`lvs`, `drbdsetup`, ...) being present on the machine running the
//! tests.

use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::PathQuotedDisplay;

/// The captured result of running a subprocess.
///
/// This intentionally never raises on a non-zero exit: callers frequently
/// need to distinguish "the tool failed" from "the tool failed in the one
/// specific way we tolerate" (an already-active LV, a not-yet-existing
/// volume on `remove`, and so on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// The argv that was run, joined for display/logging purposes.
    pub cmd: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub failed: bool,
    pub fail_reason: String,
}

impl RunResult {
    /// stdout and stderr combined, for error reporting.
    pub fn output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs an argv and returns its captured output.
///
/// Implementors must never panic on a non-zero exit status; that's exactly
/// the case callers are trying to inspect via [`RunResult::failed`].
pub trait Runner: std::fmt::Debug + Send + Sync {
    fn run(&self, argv: &[&str]) -> RunResult;
}

/// Join an argv into a single string suitable for logging, quoting any
/// argument that contains shell metacharacters.
fn join_argv(argv: &[&str]) -> String {
    argv.iter()
        .map(|a| PathQuotedDisplay::new(*a).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The production [`Runner`]: spawns a real child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, argv: &[&str]) -> RunResult {
        let cmd = join_argv(argv);
        tracing::debug!("running: {cmd}");
        let Some((prog, args)) = argv.split_first() else {
            return RunResult {
                cmd,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
                failed: true,
                fail_reason: "empty argv".to_string(),
            };
        };
        let output = match Command::new(prog).args(args).output() {
            Ok(o) => o,
            Err(e) => {
                tracing::error!("failed to spawn {cmd}: {e}");
                return RunResult {
                    cmd,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    failed: true,
                    fail_reason: format!("failed to execute: {e}"),
                };
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        let failed = !output.status.success();
        let fail_reason = if failed {
            format!("exited with status {exit_code}")
        } else {
            String::new()
        };
        if failed {
            tracing::debug!("{cmd} failed: {fail_reason}; stderr: {}", stderr.trim());
        } else {
            tracing::trace!("{cmd} -> {}", stdout.trim());
        }
        RunResult {
            cmd,
            stdout,
            stderr,
            exit_code,
            failed,
            fail_reason,
        }
    }
}

/// A single registered response for [`FakeRunner`], keyed by an argv prefix.
#[derive(Debug, Clone)]
struct FakeResponse {
    prefix: Vec<String>,
    result: RunResult,
}

/// A test-double [`Runner`] that matches argv against a table of registered
/// prefixes and returns canned output. The longest matching prefix wins.
///
/// Every invocation is recorded so tests can assert on the exact argv a
/// driver issued (the reconciliation algorithm in the replicated-mirror
/// driver is primarily specified in terms of which commands it runs, and in
/// what order).
#[derive(Debug, Default)]
pub struct FakeRunner {
    responses: Mutex<Vec<FakeResponse>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a canned successful response for any argv starting with `prefix`.
    pub fn on(&self, prefix: &[&str], stdout: &str) {
        self.on_result(
            prefix,
            RunResult {
                cmd: join_argv(prefix),
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
                failed: false,
                fail_reason: String::new(),
            },
        );
    }

    /// Register a canned failing response for any argv starting with `prefix`.
    pub fn on_failure(&self, prefix: &[&str], fail_reason: &str, stderr: &str) {
        self.on_result(
            prefix,
            RunResult {
                cmd: join_argv(prefix),
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: 1,
                failed: true,
                fail_reason: fail_reason.to_string(),
            },
        );
    }

    /// Register an arbitrary canned [`RunResult`] for any argv starting with `prefix`.
    pub fn on_result(&self, prefix: &[&str], result: RunResult) {
        self.responses.lock().unwrap().push(FakeResponse {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            result,
        });
    }

    /// All argvs run so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn matches(argv: &[&str], prefix: &[String]) -> bool {
        prefix.len() <= argv.len() && prefix.iter().zip(argv.iter()).all(|(p, a)| p == a)
    }
}

impl Runner for FakeRunner {
    fn run(&self, argv: &[&str]) -> RunResult {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        let responses = self.responses.lock().unwrap();
        let best = responses
            .iter()
            .filter(|r| Self::matches(argv, &r.prefix))
            .max_by_key(|r| r.prefix.len());
        match best {
            Some(r) => r.result.clone(),
            None => RunResult {
                cmd: join_argv(argv),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
                failed: true,
                fail_reason: format!("no fake response registered for: {}", join_argv(argv)),
            },
        }
    }
}
