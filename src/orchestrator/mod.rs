//! The control loop. One task owns every piece of mutable state — pool,
//! discovery queue, third-party index, term store, statistics — and
//! everything else talks to it through channels. No locks.
//!
//! The scheduler inside the loop is a three-state machine: Idle (evaluate
//! whether a dispatch is possible), Dispatching (one origin becomes one
//! session), Waiting (re-arm timer running). Worker requests, host events
//! and control-socket requests are serviced at any state.

pub mod timer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::behavior::run_worker;
use crate::config::Settings;
use crate::discovery::DiscoveryQueue;
use crate::host::{HostEvent, ResourceType, TabHost, TabId};
use crate::observer::terms::{TermStore, NO_TERM};
use crate::observer::ThirdPartyObserver;
use crate::pool::{Algorithm, SessionPool};
use crate::protocol::{
    Envelope, HandshakeReply, ProtocolClient, WorkerRequest, WorkerResponse,
};
use crate::session_log::SessionLog;
use crate::stats::{StatCounter, StatisticsStore};

/// Where the scheduler currently is; surfaced through `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Dispatching,
}

impl SchedulerState {
    fn as_str(self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Waiting => "waiting",
            SchedulerState::Dispatching => "dispatching",
        }
    }
}

/// A request arriving over the control socket. Replying `None` means the
/// method gets no response at all.
pub struct ControlRequest {
    pub method: String,
    pub reply: oneshot::Sender<Option<serde_json::Value>>,
}

/// Cheap handle for the pieces that live outside the control loop: the
/// socket server and the signal watcher.
#[derive(Clone)]
pub struct OrchestratorHandle {
    control_tx: mpsc::Sender<ControlRequest>,
    shutdown: Arc<Notify>,
}

impl OrchestratorHandle {
    /// Submit a control method and wait for its (possibly absent) reply.
    pub async fn control(&self, method: &str) -> Option<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        let request = ControlRequest {
            method: method.to_string(),
            reply,
        };
        if self.control_tx.send(request).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Ask the control loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

pub struct Orchestrator {
    settings: Settings,
    host: Arc<dyn TabHost>,
    pool: SessionPool,
    queue: DiscoveryQueue,
    observer: ThirdPartyObserver,
    terms: TermStore,
    stats: StatisticsStore,
    log: Option<SessionLog>,
    scheduler: SchedulerState,
    started: Instant,
    workers: HashMap<TabId, JoinHandle<()>>,
    worker_tx: mpsc::Sender<Envelope>,
    worker_rx: mpsc::Receiver<Envelope>,
    host_rx: mpsc::Receiver<HostEvent>,
    control_rx: mpsc::Receiver<ControlRequest>,
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        host: Arc<dyn TabHost>,
        host_rx: mpsc::Receiver<HostEvent>,
        stats: StatisticsStore,
        log: Option<SessionLog>,
    ) -> (Self, OrchestratorHandle) {
        let (worker_tx, worker_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(8);
        let shutdown = Arc::new(Notify::new());
        let handle = OrchestratorHandle {
            control_tx,
            shutdown: shutdown.clone(),
        };
        let pool = SessionPool::new(settings.max_connect_count);
        let orchestrator = Self {
            settings,
            host,
            pool,
            queue: DiscoveryQueue::new(),
            observer: ThirdPartyObserver::new(),
            terms: TermStore::new(),
            stats,
            log,
            scheduler: SchedulerState::Idle,
            started: Instant::now(),
            workers: HashMap::new(),
            worker_tx,
            worker_rx,
            host_rx,
            control_rx,
            shutdown,
        };
        (orchestrator, handle)
    }

    /// Run until shutdown is requested, then close every open session and
    /// persist the counters.
    pub async fn run(mut self) -> Result<()> {
        for origin in self.settings.seed_origins.clone() {
            if self.queue.enqueue(&origin) {
                debug!(%origin, "seeded discovery queue");
            }
        }
        info!(
            capacity = self.pool.capacity(),
            daily_limit = self.settings.daily_connection_limit,
            "control loop running"
        );

        let rearm = time::sleep(Duration::ZERO);
        tokio::pin!(rearm);
        let mut host_open = true;

        loop {
            tokio::select! {
                _ = &mut rearm => {
                    self.tick(today()).await;
                    let delay = self.settings.dispatch_delay.sample_thread();
                    rearm.as_mut().reset(Instant::now() + delay);
                    self.scheduler = SchedulerState::Waiting;
                }
                Some(envelope) = self.worker_rx.recv() => {
                    self.handle_envelope(envelope).await;
                }
                event = self.host_rx.recv(), if host_open => {
                    match event {
                        Some(event) => self.handle_host_event(event),
                        None => {
                            warn!("host event stream closed");
                            host_open = false;
                        }
                    }
                }
                Some(request) = self.control_rx.recv() => {
                    self.handle_control(request);
                }
                _ = self.shutdown.notified() => break,
            }
        }

        info!("shutting down");
        for (_, worker) in self.workers.drain() {
            worker.abort();
        }
        for tab in self.pool.open_handles() {
            if let Err(err) = self.host.close_tab(tab).await {
                debug!(%tab, error = %err, "close on shutdown failed");
            }
        }
        if let Err(err) = self.stats.persist() {
            warn!(error = %err, "could not persist statistics");
        }
        Ok(())
    }

    /// One scheduling pass: dispatch at most one queued origin.
    async fn tick(&mut self, today: NaiveDate) {
        self.scheduler = SchedulerState::Idle;
        if self.queue.is_empty() {
            return;
        }
        if self.pool.is_full() {
            debug!("pool full, origins stay queued");
            return;
        }
        if self.stats.daily_connections(today) >= self.settings.daily_connection_limit {
            debug!("daily connection budget spent");
            return;
        }

        self.scheduler = SchedulerState::Dispatching;
        let Some(origin) = self.queue.dequeue() else {
            return;
        };
        let algorithm = Algorithm::random(&mut rand::thread_rng());
        let Some(slot) = self.pool.try_acquire(algorithm, &origin) else {
            // Cannot happen after the is_full check, but never drop an
            // origin without a committed slot.
            return;
        };

        match self.host.open_tab(&origin).await {
            Ok(tab) => {
                self.pool.bind(slot, tab);
                self.stats.record_connection(today);
                self.stats.increment(StatCounter::VisitedSites);
                info!(%origin, %tab, %algorithm, "session dispatched");
                self.log_event("dispatched", Some(&origin), Some(tab), Some(algorithm), None);
                let client = ProtocolClient::new(tab, self.worker_tx.clone());
                let worker = tokio::spawn(run_worker(
                    self.host.clone(),
                    client,
                    self.settings.behavior_delay,
                ));
                self.workers.insert(tab, worker);
            }
            Err(err) => {
                warn!(%origin, error = %err, "could not open tab, dropping origin");
                self.pool.release_slot(slot);
                self.log_event("open_failed", Some(&origin), None, None, Some(&err.to_string()));
            }
        }
    }

    /// Service one worker request per the protocol contract.
    async fn handle_envelope(&mut self, envelope: Envelope) {
        let tab = envelope.session;
        let response: Option<WorkerResponse> = match envelope.request {
            WorkerRequest::Handshake => {
                let reply = match self.pool.find_mut(tab) {
                    Some(session) if session.fresh => {
                        session.fresh = false;
                        HandshakeReply::execute(session.algorithm)
                    }
                    Some(session) => HandshakeReply::redirected(session.algorithm),
                    None => HandshakeReply::stand_down(),
                };
                Some(WorkerResponse::Handshake(reply))
            }
            WorkerRequest::Disconnect => {
                self.release_session(tab, "disconnect").await;
                Some(WorkerResponse::Ack)
            }
            WorkerRequest::GetSearchTerm => {
                let term = match self.pool.find(tab) {
                    Some(session) => self.terms.term_for(&session.origin),
                    None => NO_TERM.to_string(),
                };
                Some(WorkerResponse::SearchTerm(term))
            }
            WorkerRequest::IncrementStat(counter) => {
                self.stats.increment(counter);
                None
            }
            WorkerRequest::GetStatistics => {
                Some(WorkerResponse::Statistics(self.stats.snapshot()))
            }
            WorkerRequest::ResetStatistics => {
                if let Err(err) = self.stats.reset() {
                    warn!(error = %err, "statistics reset did not persist");
                }
                None
            }
        };
        let _ = envelope.reply.send(response);
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::TabClosed(tab) => {
                if let Some(worker) = self.workers.remove(&tab) {
                    worker.abort();
                }
                if self.pool.release(tab) {
                    info!(%tab, "tab closed externally, slot released");
                    self.log_event("tab_closed", None, Some(tab), None, None);
                } else {
                    debug!(%tab, "close event for unmanaged tab");
                }
            }
            HostEvent::Request {
                origin,
                url,
                resource_type,
            } => {
                if resource_type == ResourceType::Document {
                    self.terms.harvest(&url);
                }
                self.observer
                    .observe(&origin, &url, resource_type, &mut self.queue);
            }
        }
    }

    fn handle_control(&mut self, request: ControlRequest) {
        let response = match request.method.as_str() {
            "status" => {
                let sessions: Vec<serde_json::Value> = self
                    .pool
                    .sessions()
                    .map(|s| {
                        json!({
                            "origin": s.origin,
                            "algorithm": s.algorithm,
                            "open_s": s.created_at.elapsed().as_secs(),
                        })
                    })
                    .collect();
                Some(json!({
                    "running": true,
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_s": self.started.elapsed().as_secs(),
                    "scheduler": self.scheduler.as_str(),
                    "open_sessions": self.pool.open_count(),
                    "capacity": self.pool.capacity(),
                    "sessions": sessions,
                    "queued_origins": self.queue.len(),
                    "observed_origins": self.observer.origin_count(),
                    "observed_endpoints": self.observer.endpoint_count(),
                    "harvested_terms": self.terms.len(),
                    "daily_connections": self.stats.daily_connections(today()),
                    "daily_limit": self.settings.daily_connection_limit,
                }))
            }
            "stats" => serde_json::to_value(self.stats.snapshot()).ok(),
            "stats.reset" => {
                if let Err(err) = self.stats.reset() {
                    warn!(error = %err, "statistics reset did not persist");
                }
                None
            }
            other => {
                debug!(method = %other, "unknown control method dropped");
                None
            }
        };
        let _ = request.reply.send(response);
    }

    /// Free a session's slot and close its tab. Idempotent; a stale tab is
    /// a no-op.
    async fn release_session(&mut self, tab: TabId, reason: &str) {
        self.workers.remove(&tab);
        if !self.pool.release(tab) {
            debug!(%tab, "release for unknown session");
            return;
        }
        if let Err(err) = self.host.close_tab(tab).await {
            debug!(%tab, error = %err, "tab close failed");
        }
        info!(%tab, reason, "session released");
        self.log_event("released", None, Some(tab), None, Some(reason));
    }

    fn log_event(
        &mut self,
        event: &str,
        origin: Option<&str>,
        tab: Option<TabId>,
        algorithm: Option<Algorithm>,
        detail: Option<&str>,
    ) {
        if let Some(log) = &mut self.log {
            if let Err(err) = log.record(event, origin, tab, algorithm, detail) {
                warn!(error = %err, "session log write failed");
            }
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
