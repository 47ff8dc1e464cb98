//! In-process stand-in for a resumable upload endpoint.
//!
//! Each accepted submission runs as its own task that reports `Accepted`, a `Progress` event per
//! chunk and then `Success` or `Error`. When the last running transfer finishes a
//! `BatchComplete` tally follows.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uploadgrid_core::{
    META_NAME, SubmitRequest, Transport, TransportError, TransportEvent, TransportId,
};

use crate::EventSender;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub chunk_bytes: usize,
    pub chunk_delay: Duration,
    /// Upper bound of random extra delay added to each chunk.
    pub jitter: Duration,
    pub base_url: String,
    /// Display name -> number of leading attempts that fail midway.
    pub failures: HashMap<String, u32>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 64 * 1024,
            chunk_delay: Duration::from_millis(25),
            jitter: Duration::ZERO,
            base_url: "https://uploads.example/files".to_string(),
            failures: HashMap::new(),
        }
    }
}

impl SimulationConfig {
    pub fn failing(mut self, display_name: impl Into<String>, attempts: u32) -> Self {
        self.failures.insert(display_name.into(), attempts);
        self
    }
}

#[derive(Debug, Default)]
struct BatchState {
    running: HashSet<TransportId>,
    succeeded: usize,
    failed: usize,
}

impl BatchState {
    /// Drops `transport_id` from the running set and returns the tally once the set drains.
    fn finish(&mut self, transport_id: &str) -> Option<TransportEvent> {
        self.running.remove(transport_id);
        if !self.running.is_empty() || self.succeeded + self.failed == 0 {
            return None;
        }
        let event = TransportEvent::BatchComplete {
            succeeded: self.succeeded,
            failed: self.failed,
        };
        self.succeeded = 0;
        self.failed = 0;
        Some(event)
    }
}

pub struct SimulatedTransport {
    events: EventSender,
    config: Arc<SimulationConfig>,
    remaining_failures: HashMap<String, u32>,
    tasks: HashMap<TransportId, JoinHandle<()>>,
    batch: Arc<Mutex<BatchState>>,
    counter: u64,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new(config: SimulationConfig, events: EventSender) -> Self {
        Self {
            events,
            remaining_failures: config.failures.clone(),
            config: Arc::new(config),
            tasks: HashMap::new(),
            batch: Arc::new(Mutex::new(BatchState::default())),
            counter: 0,
        }
    }

    /// Number of transfers whose task has not finished yet.
    pub fn running(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    fn next_transport_id(&mut self, name: &str) -> TransportId {
        self.counter = self.counter.saturating_add(1);
        let digest =
            Sha256::digest(format!("{}:{}:{}", self.counter, now_unix_ms(), name).as_bytes());
        hex::encode(&digest[..16])
    }
}

impl Transport for SimulatedTransport {
    fn submit(&mut self, request: SubmitRequest) -> Result<TransportId, TransportError> {
        if request.bytes.is_empty() {
            return Err(TransportError::Rejected("empty upload body".to_string()));
        }
        self.tasks.retain(|_, task| !task.is_finished());

        let display_name = request
            .metadata
            .get(META_NAME)
            .cloned()
            .unwrap_or_else(|| request.name.clone());
        let fail_midway = match self.remaining_failures.get_mut(&display_name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };

        let transport_id = self.next_transport_id(&request.name);
        if let Ok(mut batch) = self.batch.lock() {
            batch.running.insert(transport_id.clone());
        }

        info!(
            transport_id = %transport_id,
            name = %request.name,
            size = request.bytes.len(),
            fail_midway,
            "simulated upload accepted"
        );
        let task = tokio::spawn(run_transfer(
            transport_id.clone(),
            request.bytes.len() as u64,
            fail_midway,
            self.config.clone(),
            self.events.clone(),
            self.batch.clone(),
        ));
        self.tasks.insert(transport_id.clone(), task);
        Ok(transport_id)
    }

    fn cancel(&mut self, transport_id: &str) {
        let Some(task) = self.tasks.remove(transport_id) else {
            return;
        };
        task.abort();
        debug!(transport_id, "simulated upload cancelled");

        let tally = self
            .batch
            .lock()
            .ok()
            .and_then(|mut batch| batch.finish(transport_id));
        if let Some(event) = tally {
            let _ = self.events.send(event);
        }
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn run_transfer(
    transport_id: TransportId,
    bytes_total: u64,
    fail_midway: bool,
    config: Arc<SimulationConfig>,
    events: EventSender,
    batch: Arc<Mutex<BatchState>>,
) {
    let _ = events.send(TransportEvent::Accepted {
        transport_id: transport_id.clone(),
        size_bytes: bytes_total,
    });

    let chunk = config.chunk_bytes.max(1) as u64;
    let fail_at = fail_midway.then(|| (bytes_total / 2).max(1));
    let mut bytes_sent = 0_u64;

    let outcome = loop {
        tokio::time::sleep(config.chunk_delay + jitter(config.jitter)).await;
        bytes_sent = (bytes_sent + chunk).min(bytes_total);

        if let Some(limit) = fail_at
            && bytes_sent >= limit
        {
            break Err(format!(
                "connection reset after {bytes_sent} of {bytes_total} bytes"
            ));
        }

        let _ = events.send(TransportEvent::Progress {
            transport_id: transport_id.clone(),
            bytes_sent,
            bytes_total,
        });
        if bytes_sent >= bytes_total {
            break Ok(());
        }
    };

    let event = match outcome {
        Ok(()) => TransportEvent::Success {
            remote_url: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                transport_id
            ),
            transport_id: transport_id.clone(),
        },
        Err(reason) => TransportEvent::Error {
            transport_id: transport_id.clone(),
            reason,
        },
    };

    let tally = batch.lock().ok().and_then(|mut batch| {
        if matches!(event, TransportEvent::Success { .. }) {
            batch.succeeded += 1;
        } else {
            batch.failed += 1;
        }
        batch.finish(&transport_id)
    });

    let _ = events.send(event);
    if let Some(tally) = tally {
        let _ = events.send(tally);
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
