//! Component E — Exporter Loop.
//!
//! Single-threaded cooperative event loop, one instance per exporter.
//! Drains an inbound message queue, dispatches control messages to the
//! Mediator Registry / Intercept State Table, runs job messages through
//! the Encoder Adaptor, and forwards produced records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::encoder::{encode_job, BerEncoder, PsPduTemplate};
use crate::intercept::InterceptTable;
use crate::job::{ControlMessage, ExportMessage, Job};
use crate::mediator::MediatorRegistry;

/// Maximum messages drained from the queue before yielding to the
/// timers.
pub const MAX_MESSAGES_PER_ITERATION: usize = 1000;

/// Interval on which `connect_all()` is retried for destinations with
/// pending buffers.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Sampling counters: all `Relaxed`, all monotone, read by a
/// health-check exporter.
#[derive(Default)]
pub struct ExporterMetrics {
    pub messages_processed: AtomicU64,
    pub records_forwarded: AtomicU64,
    pub records_buffered: AtomicU64,
    pub buffer_overflow_drops: AtomicU64,
    pub connect_successes: AtomicU64,
    pub connect_failures: AtomicU64,
    pub jobs_dropped_unknown_liid: AtomicU64,
    pub jobs_dropped_encode_failure: AtomicU64,
}

impl ExporterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The exporter loop's owned state, driving one mediator-facing pipeline.
pub struct ExporterLoop<E: BerEncoder> {
    receiver: Receiver<ExportMessage>,
    registry: MediatorRegistry,
    intercepts: InterceptTable,
    encoder: E,
    template: PsPduTemplate,
    metrics: ExporterMetrics,
    last_connect_attempt: Instant,
}

impl<E: BerEncoder> ExporterLoop<E> {
    pub fn new(receiver: Receiver<ExportMessage>, encoder: E, template: PsPduTemplate) -> Self {
        ExporterLoop {
            receiver,
            registry: MediatorRegistry::new(),
            intercepts: InterceptTable::new(),
            encoder,
            template,
            metrics: ExporterMetrics::new(),
            // Backdated so the very first `run_timers()` call attempts a
            // connect immediately instead of waiting out the first
            // interval.
            last_connect_attempt: Instant::now() - CONNECT_RETRY_INTERVAL,
        }
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &MediatorRegistry {
        &self.registry
    }

    pub fn intercepts(&self) -> &InterceptTable {
        &self.intercepts
    }

    /// Runs forever, blocking in `recv_timeout` for the poll call.
    /// Returns only on an explicit channel disconnect — a production
    /// wrapper is expected to restart or exit the process.
    pub fn run(&mut self) {
        loop {
            self.drain_one_iteration();
            self.run_timers();
        }
    }

    /// Drains up to [`MAX_MESSAGES_PER_ITERATION`] messages, blocking
    /// briefly on the first if the queue is empty so the loop doesn't
    /// spin. Exposed separately from `run()` so tests can drive single
    /// iterations deterministically.
    pub fn drain_one_iteration(&mut self) {
        let mut processed = 0usize;
        loop {
            if processed >= MAX_MESSAGES_PER_ITERATION {
                break;
            }
            let msg = if processed == 0 {
                match self.receiver.recv_timeout(CONNECT_RETRY_INTERVAL) {
                    Ok(m) => m,
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.receiver.try_recv() {
                    Ok(m) => m,
                    Err(_) => break,
                }
            };
            self.dispatch(msg);
            processed += 1;
            ExporterMetrics::inc(&self.metrics.messages_processed);
        }
    }

    fn run_timers(&mut self) {
        if self.last_connect_attempt.elapsed() >= CONNECT_RETRY_INTERVAL {
            let (successes, failures) = self.registry.connect_all();
            self.metrics
                .connect_successes
                .fetch_add(successes as u64, Ordering::Relaxed);
            self.metrics
                .connect_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
            self.last_connect_attempt = Instant::now();
        }

        if self.registry.is_flagged() && self.registry.flag_timeout_elapsed() {
            self.registry.purge_unconfirmed();
        }
    }

    fn dispatch(&mut self, msg: ExportMessage) {
        match msg {
            ExportMessage::Control(ctrl) => self.dispatch_control(ctrl),
            ExportMessage::Job(job) => self.dispatch_job(job),
        }
    }

    fn dispatch_control(&mut self, ctrl: ControlMessage) {
        match ctrl {
            ControlMessage::Mediator { mediatorid, ip, port } => {
                self.registry
                    .announce(mediatorid, crate::mediator::MediatorAddress { ip, port });
            }
            ControlMessage::DropSingleMediator { mediatorid } => {
                self.registry.drop_mediator(mediatorid);
            }
            ControlMessage::InterceptDetails { liid, authcc, delivcc } => {
                self.intercepts
                    .add(crate::intercept::InterceptDetails { liid, authcc, delivcc });
            }
            ControlMessage::InterceptOver { liid } => {
                if let Err(e) = self.intercepts.end(&liid) {
                    warn!(liid = %liid, error = %e, "INTERCEPT_OVER for unknown LIID");
                }
            }
            ControlMessage::DropAllMediators => {
                self.registry.drop_all();
            }
            ControlMessage::FlagMediators => {
                self.registry.flag_all();
            }
            ControlMessage::PacketFin { packet_ref } => {
                // Mirrors trace_decrement_packet_refcount: dropping our
                // handle releases the shared capture buffer once every
                // referencing job has gone through the encoder.
                drop(packet_ref);
            }
        }
    }

    fn dispatch_job(&mut self, job: Job) {
        let liid = job.liid().clone();
        let cin = job.cin();
        let destid = job.destid();

        let Some(intercept) = self.intercepts.get(&liid) else {
            warn!(liid = %liid, "job for unknown LIID, dropping");
            ExporterMetrics::inc(&self.metrics.jobs_dropped_unknown_liid);
            return;
        };
        let details = intercept.details.clone();

        let seqno = match self.intercepts.get_or_create_counter(&liid, cin) {
            Ok(s) => s,
            Err(e) => {
                warn!(liid = %liid, cin, error = %e, "job for unknown LIID, dropping");
                ExporterMetrics::inc(&self.metrics.jobs_dropped_unknown_liid);
                return;
            }
        };

        let records = match encode_job(&self.encoder, &self.template, &details, seqno, &job) {
            Ok(records) => records,
            Err(e) => {
                warn!(liid = %liid, cin, error = %e, "encoder failed, dropping job");
                ExporterMetrics::inc(&self.metrics.jobs_dropped_encode_failure);
                return;
            }
        };

        for record in records {
            let bytes = record.to_wire_bytes();
            let was_buffered = self
                .registry
                .get(destid)
                .map(|m| m.socket.is_none() || !m.buffer.is_empty())
                .unwrap_or(true);

            match self.registry.forward(destid, bytes) {
                Ok(()) => {
                    if was_buffered {
                        ExporterMetrics::inc(&self.metrics.records_buffered);
                    } else {
                        ExporterMetrics::inc(&self.metrics.records_forwarded);
                    }
                }
                Err(()) => {
                    info!(destid, "mediator send failed, buffering for retry");
                    ExporterMetrics::inc(&self.metrics.records_buffered);
                }
            }
        }
    }
}
