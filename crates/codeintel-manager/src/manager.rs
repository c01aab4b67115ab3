//! Worker Manager (C10): the single authority for the driver's and every
//! worker's OS-process lifecycle. Every process started through `spawn`
//! gets a PID file and is eligible for restart on the same footing — the
//! spec calls out a past bug where the indexing worker alone had no
//! restart path, and the fix here is structural: there is no spawn
//! entry point that skips registration.

use crate::error::{ManagerError, Result};
use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Everything needed to start (and, on crash, restart) one worker process.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub exe: PathBuf,
    pub args: Vec<String>,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
}

struct RunningWorker {
    spec: WorkerSpec,
    child: Child,
}

pub struct WorkerManager {
    workers: Vec<RunningWorker>,
    poll_interval: Duration,
    graceful_timeout: Duration,
    last_heartbeat: Instant,
}

impl WorkerManager {
    #[must_use]
    pub fn new(poll_interval: Duration, graceful_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            poll_interval,
            graceful_timeout,
            last_heartbeat: Instant::now(),
        }
    }

    #[must_use]
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.spec.name.as_str()).collect()
    }

    pub fn spawn(&mut self, spec: WorkerSpec) -> Result<()> {
        let child = spawn_once(&spec)?;
        write_pid_file(&spec.pid_path, child.id())?;
        log::info!("worker '{}' started with pid {}", spec.name, child.id());
        self.workers.push(RunningWorker { spec, child });
        Ok(())
    }

    /// Checks every worker's liveness once, restarting any that exited.
    /// Returns the names of workers that were restarted.
    pub fn poll_once(&mut self) -> Vec<String> {
        let mut restarted = Vec::new();
        for worker in &mut self.workers {
            let alive = matches!(worker.child.try_wait(), Ok(None));
            if alive {
                continue;
            }
            log::warn!("worker '{}' is not running, restarting", worker.spec.name);
            match spawn_once(&worker.spec) {
                Ok(child) => {
                    if let Err(e) = write_pid_file(&worker.spec.pid_path, child.id()) {
                        log::error!("failed to write pid file for '{}': {e}", worker.spec.name);
                    }
                    worker.child = child;
                    restarted.push(worker.spec.name.clone());
                }
                Err(e) => log::error!("failed to restart worker '{}': {e}", worker.spec.name),
            }
        }

        if self.last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            log::info!("worker manager heartbeat: {} workers managed", self.workers.len());
            self.last_heartbeat = Instant::now();
        }
        restarted
    }

    /// Polls liveness every `poll_interval` until `should_stop` reports
    /// true (a `ctrlc`-flipped flag, typically), then runs the graceful
    /// shutdown sequence.
    pub async fn run_until(&mut self, should_stop: impl Fn() -> bool) {
        loop {
            if should_stop() {
                break;
            }
            self.poll_once();
            tokio::time::sleep(self.poll_interval).await;
        }
        self.shutdown_all();
    }

    /// SIGTERM every worker, wait up to `graceful_timeout` for each to
    /// exit on its own, then SIGKILL survivors. PID files are removed
    /// either way.
    pub fn shutdown_all(&mut self) {
        for worker in &mut self.workers {
            send_sigterm(worker.child.id());
        }

        let deadline = Instant::now() + self.graceful_timeout;
        for worker in &mut self.workers {
            loop {
                match worker.child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() >= deadline => {
                        log::warn!("force-killing worker '{}' after graceful timeout", worker.spec.name);
                        let _ = worker.child.kill();
                        let _ = worker.child.wait();
                        break;
                    }
                    _ => std::thread::sleep(Duration::from_millis(25)),
                }
            }
            let _ = fs::remove_file(&worker.spec.pid_path);
        }
    }
}

fn spawn_once(spec: &WorkerSpec) -> Result<Child> {
    if let Some(parent) = spec.log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_out = fs::OpenOptions::new().create(true).append(true).open(&spec.log_path)?;
    let log_err = log_out.try_clone()?;
    Command::new(&spec.exe)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(log_out)
        .stderr(log_err)
        .spawn()
        .map_err(ManagerError::from)
}

fn write_pid_file(path: &PathBuf, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, pid.to_string())?;
    Ok(())
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, dir: &std::path::Path, program: &str, args: &[&str]) -> WorkerSpec {
        WorkerSpec {
            name: name.to_string(),
            exe: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
            pid_path: dir.join(format!("{name}.pid")),
            log_path: dir.join(format!("{name}.log")),
        }
    }

    #[test]
    fn spawn_writes_a_pid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = WorkerManager::new(Duration::from_millis(10), Duration::from_millis(50));
        let s = spec("sleeper", tmp.path(), "sleep", &["5"]);
        let pid_path = s.pid_path.clone();
        manager.spawn(s).unwrap();

        assert!(pid_path.exists());
        manager.shutdown_all();
    }

    #[test]
    fn dead_worker_is_restarted_on_poll() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = WorkerManager::new(Duration::from_millis(10), Duration::from_millis(50));
        // `true` exits immediately, so the very first poll should see it dead.
        manager.spawn(spec("quick", tmp.path(), "true", &[])).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let restarted = manager.poll_once();
        assert_eq!(restarted, vec!["quick".to_string()]);
        manager.shutdown_all();
    }

    #[test]
    fn shutdown_force_kills_after_graceful_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = WorkerManager::new(Duration::from_millis(10), Duration::from_millis(50));
        let s = spec("stubborn", tmp.path(), "sleep", &["30"]);
        let pid_path = s.pid_path.clone();
        manager.spawn(s).unwrap();

        manager.shutdown_all();
        assert!(!pid_path.exists());
    }
}
