//! Shared helpers for end-to-end runs.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use horde::executor::{TransitionHook, WorkerState, WorkerTransition};
use tokio::time::Instant;

/// Records every worker transition with the time it happened.
#[derive(Clone)]
pub struct TransitionLog {
    start: Instant,
    events: Arc<Mutex<Vec<(Duration, WorkerTransition)>>>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hook(&self) -> TransitionHook {
        let log = self.clone();
        Arc::new(move |t| {
            let at = log.start.elapsed();
            log.events.lock().unwrap().push((at, t));
        })
    }

    pub fn events(&self) -> Vec<(Duration, WorkerTransition)> {
        self.events.lock().unwrap().clone()
    }

    /// Workers that were neither stopping nor stopped at `at`.
    pub fn live_at(&self, at: Duration) -> usize {
        let mut state = std::collections::HashMap::new();
        for (when, t) in self.events() {
            if when > at {
                continue;
            }
            state.insert(t.worker, t.to);
        }
        state
            .values()
            .filter(|s| matches!(s, WorkerState::Idle | WorkerState::Running))
            .count()
    }

    /// Time each worker reached `Stopped`.
    pub fn stopped_at(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter(|(_, t)| t.to == WorkerState::Stopped)
            .map(|(at, _)| at)
            .collect()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
