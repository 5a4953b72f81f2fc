//! Recognition loop.
//!
//! A feed task paces frames in at the configured tick. The monitor samples
//! every Nth frame and, when no cycle is in flight, hands it to the engine
//! thread together with a registry snapshot taken at that moment. Results
//! come back on a completion channel and are applied only if the session
//! has not been stopped since the cycle began.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use vestibule_core::{AccessEvent, CycleGate, CycleTicket, FrameSampler, MatchResult, RecognitionSession};

use crate::engine::{EngineError, EngineHandle};
use crate::events::EventLog;
use crate::feed::{FeedFrame, FrameFeed};

/// Counters exposed through the D-Bus `Status` call.
#[derive(Debug, Default)]
pub struct MonitorStats {
    running: AtomicBool,
    frames_seen: AtomicU64,
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
    stale_discarded: AtomicU64,
    last_granted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub running: bool,
    pub frames_seen: u64,
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub stale_discarded: u64,
    /// Granted probes in the latest applied cycle.
    pub last_granted: u64,
}

impl MonitorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            running: self.running.load(Ordering::Relaxed),
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            last_granted: self.last_granted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A finished engine cycle on its way back to the monitor.
pub struct CycleOutcome {
    ticket: CycleTicket,
    sequence: u64,
    result: Result<Vec<MatchResult>, EngineError>,
}

enum FeedEvent {
    Frame(FeedFrame),
    Malformed(String),
    Ended(Option<String>),
}

pub struct Monitor {
    session: RecognitionSession,
    engine: EngineHandle,
    gate: CycleGate,
    sampler: FrameSampler,
    stats: Arc<MonitorStats>,
    events: Arc<EventLog>,
    active: bool,
}

impl Monitor {
    pub fn new(
        session: RecognitionSession,
        engine: EngineHandle,
        every_n_frames: u64,
        stats: Arc<MonitorStats>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            session,
            engine,
            gate: CycleGate::new(),
            sampler: FrameSampler::new(every_n_frames),
            stats,
            events,
            active: false,
        }
    }

    /// Drive the loop until the control channel's sender is dropped.
    pub async fn run<R>(mut self, feed: FrameFeed<R>, mut control: watch::Receiver<bool>, tick: Duration)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(1);
        let (done_tx, mut done_rx) = mpsc::channel::<CycleOutcome>(1);
        tokio::spawn(pump_feed(feed, tick, feed_tx));
        let mut feed_open = true;

        if *control.borrow_and_update() {
            self.start();
        }

        loop {
            tokio::select! {
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let want = *control.borrow_and_update();
                    if want && !self.active {
                        self.start();
                    } else if !want && self.active {
                        self.stop();
                    }
                }
                Some(outcome) = done_rx.recv() => {
                    self.complete_cycle(outcome);
                }
                event = feed_rx.recv(), if feed_open => match event {
                    Some(FeedEvent::Frame(frame)) => {
                        self.on_frame(frame, &done_tx);
                    }
                    Some(FeedEvent::Malformed(msg)) => self.session.diagnostic(&msg),
                    Some(FeedEvent::Ended(Some(msg))) => {
                        feed_open = false;
                        self.session.diagnostic(&msg);
                    }
                    Some(FeedEvent::Ended(None)) | None => {
                        feed_open = false;
                        self.events.note("Extraction feed ended.");
                    }
                },
            }
        }
        tracing::info!("monitor loop exiting");
    }

    pub fn start(&mut self) {
        self.active = true;
        self.sampler.reset();
        self.stats.running.store(true, Ordering::Relaxed);
        self.events.note("System started.");
    }

    /// Stop monitoring. Any cycle still in flight will be discarded.
    pub fn stop(&mut self) {
        self.active = false;
        let epoch = self.gate.advance_epoch();
        self.session.reset();
        self.stats.running.store(false, Ordering::Relaxed);
        self.stats.last_granted.store(0, Ordering::Relaxed);
        tracing::debug!(epoch, "session epoch advanced");
        self.events.note("System stopped.");
    }

    /// Start a cycle for `frame` if it is sampled and the engine is idle.
    /// Returns whether a cycle was started.
    fn on_frame(&mut self, frame: FeedFrame, done_tx: &mpsc::Sender<CycleOutcome>) -> bool {
        if !self.active {
            return false;
        }
        MonitorStats::bump(&self.stats.frames_seen);
        if !self.sampler.observe() {
            return false;
        }
        let Some(ticket) = self.gate.try_begin() else {
            MonitorStats::bump(&self.stats.cycles_skipped);
            tracing::debug!(seq = frame.sequence, "cycle in flight, skipping frame");
            return false;
        };

        let snapshot = self.session.registry().snapshot();
        let policy = *self.session.policy();
        let engine = self.engine.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = engine.recognize(frame.extractions, snapshot, policy).await;
            let _ = done_tx
                .send(CycleOutcome {
                    ticket,
                    sequence: frame.sequence,
                    result,
                })
                .await;
        });
        true
    }

    /// Apply a finished cycle unless it started before the last stop.
    /// Returns the access events it produced, or `None` if it was dropped.
    pub fn complete_cycle(&mut self, outcome: CycleOutcome) -> Option<Vec<AccessEvent>> {
        let done = self.gate.finish(outcome.ticket);
        if !done.current {
            MonitorStats::bump(&self.stats.stale_discarded);
            tracing::debug!(epoch = done.epoch, seq = outcome.sequence, "discarding stale cycle");
            return None;
        }
        MonitorStats::bump(&self.stats.cycles_run);

        match outcome.result {
            Ok(results) => {
                let granted = results.iter().filter(|r| r.granted).count() as u64;
                self.stats.last_granted.store(granted, Ordering::Relaxed);
                Some(self.session.apply(&results))
            }
            Err(err) => {
                self.session.diagnostic(&format!("Recognition error: {err}"));
                None
            }
        }
    }
}

/// Pull frames at `tick` pace and forward them to the monitor.
async fn pump_feed<R>(mut feed: FrameFeed<R>, tick: Duration, tx: mpsc::Sender<FeedEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let event = match feed.next_frame().await {
            Ok(Some(frame)) => FeedEvent::Frame(frame),
            Ok(None) => {
                let _ = tx.send(FeedEvent::Ended(None)).await;
                return;
            }
            Err(err) if err.is_recoverable() => FeedEvent::Malformed(format!("Skipping frame: {err}")),
            Err(err) => {
                let _ = tx.send(FeedEvent::Ended(Some(format!("Feed failed: {err}")))).await;
                return;
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
}
