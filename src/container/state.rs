//! Container state machine
//!
//! Concurrent state with a blocking wait: readers snapshot under the
//! lock, transitions broadcast on a condition variable so any number of
//! waiters wake when the container stops.

use crate::error::{CaskError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Persisted snapshot of a container's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    /// Whether the supervised process is running
    pub running: bool,
    /// Pid of the isolation helper while running
    pub pid: i32,
    /// Exit code of the last run
    pub exit_code: i32,
    /// When the container was last started
    pub started_at: Option<DateTime<Utc>>,
    /// When the container last stopped
    pub finished_at: Option<DateTime<Utc>>,
    /// Running, but the supervisor has lost contact
    pub ghost: bool,
}

/// Concurrent container state with blocking wait
#[derive(Debug, Default)]
pub struct State {
    data: Mutex<StateData>,
    cond: Condvar,
}

fn lock_err<T>(_: T) -> CaskError {
    CaskError::Lock("Failed to acquire state lock".to_string())
}

impl State {
    /// Build a state machine from a persisted snapshot
    pub fn from_data(data: StateData) -> State {
        State {
            data: Mutex::new(data),
            cond: Condvar::new(),
        }
    }

    /// Snapshot the current state
    pub fn snapshot(&self) -> StateData {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Whether the container is running
    pub fn is_running(&self) -> bool {
        self.data.lock().map(|d| d.running).unwrap_or(false)
    }

    /// Whether the container is a ghost
    pub fn is_ghost(&self) -> bool {
        self.data.lock().map(|d| d.ghost).unwrap_or(false)
    }

    /// Pid of the supervised process, 0 when stopped
    pub fn pid(&self) -> i32 {
        self.data.lock().map(|d| d.pid).unwrap_or(0)
    }

    /// Exit code of the last run
    pub fn exit_code(&self) -> i32 {
        self.data.lock().map(|d| d.exit_code).unwrap_or(0)
    }

    /// Transition to running
    pub fn set_running(&self, pid: i32) -> Result<()> {
        let mut data = self.data.lock().map_err(lock_err)?;
        data.running = true;
        data.ghost = false;
        data.exit_code = 0;
        data.pid = pid;
        data.started_at = Some(Utc::now());
        self.cond.notify_all();
        Ok(())
    }

    /// Transition to stopped
    pub fn set_stopped(&self, exit_code: i32) -> Result<()> {
        let mut data = self.data.lock().map_err(lock_err)?;
        data.running = false;
        data.pid = 0;
        data.exit_code = exit_code;
        data.finished_at = Some(Utc::now());
        self.cond.notify_all();
        Ok(())
    }

    /// Toggle the ghost flag
    pub fn set_ghost(&self, ghost: bool) -> Result<()> {
        let mut data = self.data.lock().map_err(lock_err)?;
        data.ghost = ghost;
        Ok(())
    }

    /// Block until the container is not running, then return the exit
    /// code. Safe for any number of waiters.
    pub fn wait(&self) -> Result<i32> {
        let mut data = self.data.lock().map_err(lock_err)?;
        while data.running {
            data = self.cond.wait(data).map_err(lock_err)?;
        }
        Ok(data.exit_code)
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<i32> {
        let deadline = Instant::now() + timeout;
        let mut data = self.data.lock().map_err(lock_err)?;
        while data.running {
            let now = Instant::now();
            if now >= deadline {
                return Err(CaskError::Timeout("Timed out".to_string()));
            }
            let (guard, result) = self
                .cond
                .wait_timeout(data, deadline - now)
                .map_err(lock_err)?;
            data = guard;
            if result.timed_out() && data.running {
                return Err(CaskError::Timeout("Timed out".to_string()));
            }
        }
        Ok(data.exit_code)
    }
}

fn human_duration(d: chrono::TimeDelta) -> String {
    let seconds = d.num_seconds().max(0);
    match seconds {
        0..=59 => format!("{} seconds", seconds),
        60..=119 => "About a minute".to_string(),
        120..=3599 => format!("{} minutes", seconds / 60),
        3600..=7199 => "About an hour".to_string(),
        7200..=172799 => format!("{} hours", seconds / 3600),
        _ => format!("{} days", seconds / 86400),
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.snapshot();
        if data.running {
            if data.ghost {
                return write!(f, "Ghost");
            }
            let since = data
                .started_at
                .map(|t| human_duration(Utc::now() - t))
                .unwrap_or_default();
            return write!(f, "Up {}", since);
        }
        let Some(finished_at) = data.finished_at else {
            return Ok(());
        };
        write!(
            f,
            "Exited ({}) {} ago",
            data.exit_code,
            human_duration(Utc::now() - finished_at)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_created_state() {
        let state = State::default();
        assert!(!state.is_running());
        assert_eq!(state.pid(), 0);
        assert_eq!(state.to_string(), "");
    }

    #[test]
    fn test_running_then_stopped() {
        let state = State::default();
        state.set_running(42).unwrap();
        assert!(state.is_running());
        assert_eq!(state.pid(), 42);
        assert!(state.to_string().starts_with("Up "));

        state.set_stopped(3).unwrap();
        assert!(!state.is_running());
        assert_eq!(state.pid(), 0);
        assert_eq!(state.exit_code(), 3);
        let rendered = state.to_string();
        assert!(rendered.starts_with("Exited (3)"), "got {:?}", rendered);
        assert!(rendered.ends_with("ago"), "got {:?}", rendered);
    }

    #[test]
    fn test_restart_resets_exit_code() {
        let state = State::default();
        state.set_running(1).unwrap();
        state.set_stopped(7).unwrap();
        state.set_running(2).unwrap();
        assert_eq!(state.exit_code(), 0);
        assert!(state.is_running());
    }

    #[test]
    fn test_ghost_flag() {
        let state = State::default();
        state.set_running(9).unwrap();
        state.set_ghost(true).unwrap();
        assert!(state.is_ghost());
        assert_eq!(state.to_string(), "Ghost");
        // A fresh start clears the flag.
        state.set_running(10).unwrap();
        assert!(!state.is_ghost());
    }

    #[test]
    fn test_wait_returns_immediately_when_stopped() {
        let state = State::default();
        assert_eq!(state.wait().unwrap(), 0);
    }

    #[test]
    fn test_wait_blocks_until_stopped() {
        let state = Arc::new(State::default());
        state.set_running(1).unwrap();

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let state = state.clone();
            waiters.push(std::thread::spawn(move || state.wait().unwrap()));
        }
        std::thread::sleep(Duration::from_millis(30));
        state.set_stopped(5).unwrap();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 5);
        }
    }

    #[test]
    fn test_wait_timeout_expires() {
        let state = State::default();
        state.set_running(1).unwrap();
        match state.wait_timeout(Duration::from_millis(50)) {
            Err(CaskError::Timeout(_)) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_timeout_observes_stop() {
        let state = Arc::new(State::default());
        state.set_running(1).unwrap();
        let stopper = state.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stopper.set_stopped(2).unwrap();
        });
        assert_eq!(state.wait_timeout(Duration::from_secs(5)).unwrap(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let state = State::default();
        state.set_running(11).unwrap();
        state.set_stopped(4).unwrap();

        let data = state.snapshot();
        let restored = State::from_data(data.clone());
        assert_eq!(restored.snapshot(), data);
        assert_eq!(restored.exit_code(), 4);
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(chrono::TimeDelta::seconds(5)), "5 seconds");
        assert_eq!(human_duration(chrono::TimeDelta::seconds(70)), "About a minute");
        assert_eq!(human_duration(chrono::TimeDelta::seconds(600)), "10 minutes");
        assert_eq!(human_duration(chrono::TimeDelta::hours(5)), "5 hours");
        assert_eq!(human_duration(chrono::TimeDelta::days(3)), "3 days");
    }
}
