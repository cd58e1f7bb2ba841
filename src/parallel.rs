//! Worker pool for parallel decapsulation with hash-based worker assignment.
//!
//! The engine is stateless, so any worker could take any frame. Frames are
//! still dispatched by a hash of the outer source address so that one tunnel
//! endpoint always lands on the same worker and its results stay in order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::config::DecapConfig;
use crate::consts::{ipv4, ipv6};
use crate::decapsulate::Decapsulator;
use crate::error::DecapError;
use crate::ip_header::IpVersion;
use crate::output::DecapResult;
use crate::packet_parser::{locate_l3, DatalinkFormat};
use crate::process::decapsulate_frame;

type ResultSender = Arc<Mutex<Option<std::sync::mpsc::Sender<DecapResult>>>>;

/// Result of packet dispatch to worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Packet successfully queued for processing
    Queued,
    /// Packet dropped (queue full or pool shutdown)
    Dropped,
}

/// Statistics for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    /// Current queue size
    pub queue_size: usize,
    /// Number of packets dropped by this worker
    pub dropped: u64,
}

impl std::fmt::Display for WorkerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Worker {}: queue_size={}, dropped={}", self.id, self.queue_size, self.dropped)
    }
}

/// Statistics for the entire worker pool.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_dispatched: u64,
    pub total_dropped: u64,
    /// Frames processed without any recognised tunnel
    pub total_unmatched: u64,
    pub workers: Vec<WorkerStats>,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Decap Pool Stats - packets dispatched: {}, packets dropped: {}, unmatched: {}",
            self.total_dispatched, self.total_dropped, self.total_unmatched
        )?;
        for worker in &self.workers {
            writeln!(f, "  {worker}")?;
        }
        Ok(())
    }
}

/// Worker pool for parallel decapsulation with hash-based dispatch.
pub struct WorkerPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    packet_senders: Arc<Mutex<Vec<Sender<Vec<u8>>>>>,
    result_sender: ResultSender,
    pub num_workers: NonZeroUsize,
    dispatched_count: AtomicU64,
    dropped_count: AtomicU64,
    unmatched_count: Arc<AtomicU64>,
    worker_dropped: Vec<AtomicU64>,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Parameters
    /// - `num_workers`: Number of worker threads
    /// - `queue_size`: Size of each worker's packet queue
    /// - `result_sender`: Channel to send decapsulated frames
    /// - `config`: Decapsulation settings shared by every worker
    /// - `format`: Datalink format of dispatched frames, `None` to autodetect
    ///
    /// # Errors
    /// Returns error if `num_workers` is 0, the configuration is invalid or
    /// thread creation fails.
    pub fn new(
        num_workers: usize,
        queue_size: usize,
        result_sender: std::sync::mpsc::Sender<DecapResult>,
        config: DecapConfig,
        format: Option<DatalinkFormat>,
    ) -> Result<Self, DecapError> {
        let num_workers = NonZeroUsize::new(num_workers).ok_or(DecapError::Misconfiguration(
            "Worker count must be greater than 0".to_string(),
        ))?;
        let decapsulator = Arc::new(Decapsulator::new(config)?);

        let mut workers = Vec::new();
        let mut packet_senders = Vec::new();
        let mut worker_dropped = Vec::new();
        let unmatched_count = Arc::new(AtomicU64::new(0));

        let result_sender = Arc::new(Mutex::new(Some(result_sender)));

        for worker_id in 0..num_workers.get() {
            let (tx, rx) = bounded::<Vec<u8>>(queue_size);
            packet_senders.push(tx);
            worker_dropped.push(AtomicU64::new(0));

            let result_sender_clone = Arc::clone(&result_sender);
            let worker_decapsulator = Arc::clone(&decapsulator);
            let worker_unmatched = Arc::clone(&unmatched_count);

            let handle = thread::Builder::new()
                .name(format!("decap-worker-{worker_id}"))
                .spawn(move || {
                    Self::worker_loop(
                        worker_id,
                        rx,
                        result_sender_clone,
                        worker_decapsulator,
                        worker_unmatched,
                        format,
                    );
                })
                .map_err(|e| {
                    DecapError::Misconfiguration(format!("Failed to spawn worker thread: {e}"))
                })?;

            workers.push(handle);
        }

        Ok(Self {
            workers: Mutex::new(workers),
            packet_senders: Arc::new(Mutex::new(packet_senders)),
            result_sender,
            num_workers,
            dispatched_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            unmatched_count,
            worker_dropped,
        })
    }

    fn worker_loop(
        worker_id: usize,
        rx: Receiver<Vec<u8>>,
        result_sender: ResultSender,
        decapsulator: Arc<Decapsulator>,
        unmatched: Arc<AtomicU64>,
        format: Option<DatalinkFormat>,
    ) {
        while let Ok(packet) = rx.recv() {
            match decapsulate_frame(&decapsulator, packet, format) {
                Ok(result) => {
                    if let Ok(guard) = result_sender.lock() {
                        if let Some(ref sender) = *guard {
                            if sender.send(result).is_err() {
                                // Receiver dropped, exit worker
                                break;
                            }
                        } else {
                            // Pool is shutting down
                            break;
                        }
                    }
                }
                Err(reason) => {
                    unmatched.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Worker {worker_id}: frame not decapsulated, {reason}");
                }
            }
        }

        tracing::debug!("Decap worker {worker_id} exiting");
    }

    /// Dispatches a frame to the worker owning its outer source address.
    pub fn dispatch(&self, packet: Vec<u8>) -> DispatchResult {
        let worker_id = Self::hash_source_ip(&packet)
            .checked_rem(self.num_workers.get())
            .unwrap_or(0);

        let Ok(senders) = self.packet_senders.lock() else {
            return self.record_drop(worker_id);
        };
        let Some(sender) = senders.get(worker_id) else {
            // Pool is shutting down
            return self.record_drop(worker_id);
        };

        match sender.try_send(packet) {
            Ok(()) => {
                self.dispatched_count.fetch_add(1, Ordering::Relaxed);
                DispatchResult::Queued
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.record_drop(worker_id)
            }
        }
    }

    fn record_drop(&self, worker_id: usize) -> DispatchResult {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.worker_dropped.get(worker_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        DispatchResult::Dropped
    }

    /// Hashes the outer source address of a frame, or the whole frame when no
    /// IP header can be found.
    fn hash_source_ip(packet: &[u8]) -> usize {
        let source = locate_l3(packet).and_then(|start| {
            let (from, len) = match start.version {
                IpVersion::V4 => (ipv4::SRC_OFFSET, 4),
                IpVersion::V6 => (ipv6::SRC_OFFSET, 16),
            };
            let begin = start.offset + from;
            packet.get(begin..begin + len)
        });
        Self::hash_bytes(source.unwrap_or(packet))
    }

    fn hash_bytes(bytes: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish() as usize
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let mut workers = Vec::new();

        if let Ok(senders) = self.packet_senders.lock() {
            for (id, sender) in senders.iter().enumerate() {
                workers.push(WorkerStats {
                    id,
                    queue_size: sender.len(),
                    dropped: self.worker_dropped.get(id).map_or(0, |c| c.load(Ordering::Relaxed)),
                });
            }
        }

        PoolStats {
            total_dispatched: self.dispatched_count.load(Ordering::Relaxed),
            total_dropped: self.dropped_count.load(Ordering::Relaxed),
            total_unmatched: self.unmatched_count.load(Ordering::Relaxed),
            workers,
        }
    }

    /// Initiates graceful shutdown of the worker pool.
    ///
    /// Queued frames are still processed; their results are discarded once
    /// the result channel is released.
    pub fn shutdown(&self) {
        if let Ok(mut senders) = self.packet_senders.lock() {
            senders.clear();
        }
        if let Ok(mut sender) = self.result_sender.lock() {
            *sender = None;
        }
    }

    /// Stops accepting frames and waits until every queued frame is processed.
    ///
    /// Unlike [`WorkerPool::shutdown`] the result channel stays open until the
    /// workers exit, so no queued result is lost.
    pub fn join(&self) {
        if let Ok(mut senders) = self.packet_senders.lock() {
            senders.clear();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Decap worker panicked");
            }
        }
        if let Ok(mut sender) = self.result_sender.lock() {
            *sender = None;
        }
    }
}
