//! Synthetic CPU load generation
//!
//! Workers are separate processes running a tight arithmetic loop, so they
//! share nothing with the scheduler except CPU time. The controller is a
//! two-state machine: `start` spawns one worker per unit, `stop` terminates
//! all of them and does not return while any is still alive.

mod service;

pub use service::{StressHandle, StressStatus};

use crate::error::{SchedError, SchedResult};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hidden CLI subcommand that runs `burn`
pub const WORKER_SUBCOMMAND: &str = "stress-worker";

/// Program and arguments that become one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerSpec {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Re-invoke the running binary in worker mode
    pub fn current_exe() -> SchedResult<Self> {
        let program = std::env::current_exe()
            .map_err(|e| SchedError::Stress(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(program, &[WORKER_SUBCOMMAND]))
    }
}

#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Workers per `start` (default: available parallelism)
    pub workers: usize,
    /// How long `stop` waits for SIGTERM before killing
    pub stop_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            workers: available_units(),
            stop_grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Logical processing units visible to this process
pub fn available_units() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressState {
    Idle,
    Running,
}

/// How the workers of one session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// Exited after SIGTERM within the grace period
    pub graceful: usize,
    /// Killed after the grace period ran out
    pub forced: usize,
}

impl StopReport {
    pub fn total(&self) -> usize {
        self.graceful + self.forced
    }
}

pub struct StressLoadController {
    spec: WorkerSpec,
    config: StressConfig,
    workers: Vec<Child>,
    logger: StructuredLogger,
    metrics: SchedulerMetrics,
}

impl StressLoadController {
    pub fn new(spec: WorkerSpec, config: StressConfig) -> Self {
        Self {
            spec,
            config,
            workers: Vec::new(),
            logger: StructuredLogger::new("hetsched"),
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> StressState {
        if self.workers.is_empty() {
            StressState::Idle
        } else {
            StressState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == StressState::Running
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_pids(&self) -> Vec<u32> {
        self.workers.iter().map(|c| c.id()).collect()
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Spawn the worker set. A no-op returning the current count when already running.
    pub fn start(&mut self) -> SchedResult<usize> {
        if self.is_running() {
            debug!(workers = self.workers.len(), "Stress load already running");
            return Ok(self.workers.len());
        }
        if self.config.workers == 0 {
            return Err(SchedError::Stress("worker count must be at least 1".to_string()));
        }

        for i in 0..self.config.workers {
            match self.spawn_worker() {
                Ok(child) => self.workers.push(child),
                Err(e) => {
                    let report = self.stop_workers();
                    warn!(
                        spawned = report.total(),
                        error = %e,
                        "Stress worker spawn failed, tore down partial worker set"
                    );
                    self.metrics.set_stress_workers(0);
                    return Err(SchedError::Stress(format!(
                        "failed to spawn worker {} ({}): {}",
                        i,
                        self.spec.program.display(),
                        e
                    )));
                }
            }
        }

        self.metrics.set_stress_workers(self.workers.len());
        self.logger.log_stress_started(self.workers.len());
        Ok(self.workers.len())
    }

    /// Terminate every worker. Idle controllers return an empty report.
    pub fn stop(&mut self) -> StopReport {
        if !self.is_running() {
            return StopReport::default();
        }

        let report = self.stop_workers();
        self.metrics.set_stress_workers(0);
        self.logger.log_stress_stopped(report.graceful, report.forced);
        report
    }

    fn spawn_worker(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Workers die with the thread that spawned them if the scheduler is killed outright
        #[cfg(target_os = "linux")]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong);
                Ok(())
            });
        }

        cmd.spawn()
    }

    fn stop_workers(&mut self) -> StopReport {
        let mut workers = std::mem::take(&mut self.workers);
        for child in workers.iter_mut() {
            terminate(child);
        }

        let deadline = Instant::now() + self.config.stop_grace;
        let mut graceful = 0;
        loop {
            workers.retain_mut(|child| match child.try_wait() {
                Ok(Some(_)) => {
                    graceful += 1;
                    false
                }
                Ok(None) | Err(_) => true,
            });
            if workers.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(self.config.poll_interval);
        }

        let forced = workers.len();
        for mut child in workers {
            self.logger.log_stress_worker_forced(child.id());
            let _ = child.kill();
            let _ = child.wait();
        }

        StopReport { graceful, forced }
    }
}

impl Drop for StressLoadController {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Saturate one CPU forever. Entry point of a worker process.
pub fn burn() -> ! {
    let mut x: u64 = 1;
    loop {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
        std::hint::black_box(x);
    }
}
