//! Control runtime: the acquisition and maintenance loops.
//!
//! Runs in one dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` timers for cadence. Three concurrent
//! futures:
//!
//! 1. **Acquisition**: every poll interval, asks each channel worker for a
//!    reading and feeds the results to the control service as they arrive.
//!    A channel with no result by the tick deadline is settled as a failure
//!    so the other channels keep their cadence
//! 2. **Pulse**: turns the humidity relay on, waits, turns it off
//! 3. **Maintenance**: daylight check and housekeeping every maintenance
//!    interval
//!
//! Sensor transactions busy-poll the data line, so each channel gets its
//! own worker thread and the executor never blocks on one.
//!
//! ```text
//!  ┌───────────────────────────────────────────────┐
//!  │  control thread                               │
//!  │  ┌─────────────────────────────────────────┐  │      ┌────────────┐
//!  │  │  edge_executor::LocalExecutor           │  │ req  │ dht-1      │
//!  │  │  ┌─────────────┐ ┌───────┐ ┌──────────┐ │──┼─────▶│ dht-2      │
//!  │  │  │ acquisition │ │ pulse │ │ maintain │ │  │      │ dht-3 ...  │
//!  │  │  │ 30 s        │ │       │ │ 5 min    │ │◀─┼──────│            │
//!  │  │  └─────────────┘ └───────┘ └──────────┘ │  │ read └────────────┘
//!  │  └─────────────────────────────────────────┘  │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! Every wait races the shared [`Shutdown`] signal, so the loops stop
//! within one scheduler turn of [`Shutdown::trigger`].

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BTreeSet;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::app::service::{ControlService, HumidityPulse};
use crate::drivers::task::spawn_worker;
use crate::error::SensorError;
use crate::model::{ChannelId, Measurement};
use crate::sensors::{ChannelSlot, RetryPolicy, SensorReader, read_with_retry};

/// Upper bound on concurrently read channels.
pub const MAX_CHANNELS: usize = 8;

/// Humidity pulses waiting to be fired.
const PULSE_DEPTH: usize = 2;

/// Shortest wait for channel results in one tick. Ticks faster than this
/// still give a healthy transaction room to finish.
const MIN_COLLECT_WINDOW: Duration = Duration::from_secs(1);

/// How long shutdown waits for workers to leave a transaction.
pub const WORKER_GRACE: Duration = Duration::from_secs(1);
const WORKER_GRACE_POLL: Duration = Duration::from_millis(5);

const CONTROL_STACK_KB: usize = 64;
const WORKER_STACK_KB: usize = 32;

type CsSignal<T> = Signal<CriticalSectionRawMutex, T>;

// ═══════════════════════════════════════════════════════════════
//  Shutdown signal
// ═══════════════════════════════════════════════════════════════

struct ShutdownInner {
    requested: AtomicBool,
    listeners: Mutex<Vec<Arc<CsSignal<()>>>>,
}

/// Process-wide cancellation. Cheap to clone; every clone triggers the same
/// signal.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request shutdown and wake every listener. Idempotent.
    pub fn trigger(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
        }
        for l in self.inner.listeners.lock().iter() {
            l.signal(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// A waiter for one task. Each concurrently waiting task needs its own.
    pub fn listener(&self) -> ShutdownListener {
        let signal = Arc::new(CsSignal::new());
        self.inner.listeners.lock().push(signal.clone());
        ShutdownListener {
            shutdown: self.clone(),
            signal,
        }
    }
}

pub struct ShutdownListener {
    shutdown: Shutdown,
    signal: Arc<CsSignal<()>>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        while !self.shutdown.is_triggered() {
            self.signal.wait().await;
        }
    }

    /// Sleep for `duration` unless shutdown comes first. Returns `true` if
    /// shutdown was requested.
    pub async fn sleep(&self, duration: Duration) -> bool {
        future::or(
            async {
                self.wait().await;
                true
            },
            async {
                Timer::after(duration).await;
                self.is_triggered()
            },
        )
        .await
    }

    /// Await `fut` unless shutdown comes first.
    pub async fn until<T>(&self, fut: impl core::future::Future<Output = T>) -> Option<T> {
        future::or(async { Some(fut.await) }, async {
            self.wait().await;
            None
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════
//  Channel workers
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Request {
    Read { tick: u64, policy: RetryPolicy },
    Stop,
}

struct ReadOutcome {
    tick: u64,
    channel: ChannelId,
    outcome: Result<Measurement, SensorError>,
}

type Outcomes = Channel<CriticalSectionRawMutex, ReadOutcome, MAX_CHANNELS>;

/// One thread per channel. It owns the reader (and therefore the pin) for
/// its whole life and runs one retry sequence per request.
///
/// A panicking reader is reported as [`SensorError::ReaderLost`] for the
/// tick in flight, after which the worker exits and drops the reader.
struct Worker {
    channel: ChannelId,
    request: Arc<CsSignal<Request>>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(
        channel: ChannelId,
        mut reader: Box<dyn SensorReader>,
        outcomes: Arc<Outcomes>,
    ) -> io::Result<Self> {
        let request = Arc::new(CsSignal::new());
        let rx = request.clone();
        let handle = spawn_worker(&format!("dht-{channel}"), WORKER_STACK_KB, move || {
            loop {
                let Request::Read { tick, policy } = future::block_on(rx.wait()) else {
                    break;
                };
                let attempt = panic::catch_unwind(AssertUnwindSafe(|| read_with_retry(reader.as_mut(), policy)));
                let lost = attempt.is_err();
                let outcome = attempt.unwrap_or(Err(SensorError::ReaderLost));
                if outcomes.try_send(ReadOutcome { tick, channel, outcome }).is_err() {
                    error!("channel {}: result queue full, reading dropped", channel);
                }
                if lost {
                    error!("channel {}: reader panicked, channel out of service", channel);
                    break;
                }
            }
        })?;
        Ok(Self {
            channel,
            request,
            handle,
        })
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Runtime
// ═══════════════════════════════════════════════════════════════

pub struct Runtime {
    service: Arc<ControlService>,
    channels: Vec<ChannelSlot>,
    shutdown: Shutdown,
}

impl Runtime {
    pub fn new(service: Arc<ControlService>, channels: Vec<ChannelSlot>, shutdown: Shutdown) -> Self {
        Self {
            service,
            channels,
            shutdown,
        }
    }

    /// Run on a dedicated `control` thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        spawn_worker("control", CONTROL_STACK_KB, move || self.run())
    }

    /// Run on the current thread until shutdown. Relays are forced OFF when
    /// this returns. Workers still inside a transaction after
    /// [`WORKER_GRACE`] are detached rather than joined.
    pub fn run(self) {
        let Self {
            service,
            channels,
            shutdown,
        } = self;

        let outcomes: Arc<Outcomes> = Arc::new(Channel::new());
        let workers = start_workers(channels, &outcomes);
        let pulses: Channel<CriticalSectionRawMutex, HumidityPulse, PULSE_DEPTH> = Channel::new();

        {
            let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

            let acquisition = executor.spawn(acquisition_loop(
                &service,
                &workers,
                &outcomes,
                &pulses,
                shutdown.listener(),
            ));
            let pulse = executor.spawn(pulse_loop(&service, &pulses, shutdown.listener()));
            let maintenance = executor.spawn(maintenance_loop(&service, shutdown.listener()));

            info!(
                "control runtime started ({} channels, poll {} ms)",
                workers.len(),
                service.timing().poll_interval_ms
            );

            future::block_on(executor.run(future::zip(acquisition, future::zip(pulse, maintenance))));
        }

        service.shutdown();

        stop_workers(workers);
        info!("control runtime stopped");
    }
}

fn start_workers(channels: Vec<ChannelSlot>, outcomes: &Arc<Outcomes>) -> Vec<Worker> {
    let mut workers = Vec::new();
    for slot in channels {
        let Some(reader) = slot.reader else {
            continue;
        };
        if workers.len() == MAX_CHANNELS {
            warn!("channel {} ({}) skipped: at most {} channels", slot.config.id, slot.config.label, MAX_CHANNELS);
            continue;
        }
        match Worker::spawn(slot.config.id, reader, outcomes.clone()) {
            Ok(w) => workers.push(w),
            Err(e) => error!("channel {} ({}) worker not started: {}", slot.config.id, slot.config.label, e),
        }
    }
    workers
}

fn stop_workers(workers: Vec<Worker>) {
    for w in &workers {
        w.request.signal(Request::Stop);
    }
    let deadline = Instant::now() + WORKER_GRACE;
    while workers.iter().any(Worker::is_alive) && Instant::now() < deadline {
        std::thread::sleep(WORKER_GRACE_POLL);
    }
    for w in workers {
        if w.is_alive() {
            warn!("channel {} worker still busy after {:?}, detached", w.channel, WORKER_GRACE);
        } else if w.handle.join().is_err() {
            error!("channel {} worker panicked", w.channel);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Loops
// ═══════════════════════════════════════════════════════════════

async fn acquisition_loop(
    service: &ControlService,
    workers: &[Worker],
    outcomes: &Outcomes,
    pulses: &Channel<CriticalSectionRawMutex, HumidityPulse, PULSE_DEPTH>,
    stop: ShutdownListener,
) {
    let mut lost = BTreeSet::new();
    let mut tick: u64 = 0;

    while !stop.is_triggered() {
        tick += 1;
        let started = Instant::now();
        let timing = service.timing();
        let policy = RetryPolicy::from(&timing);
        let interval = Duration::from_millis(timing.poll_interval_ms);
        let deadline = started + interval.max(MIN_COLLECT_WINDOW);

        let mut pending = BTreeSet::new();
        for w in workers {
            if w.is_alive() {
                w.request.signal(Request::Read { tick, policy });
                pending.insert(w.channel);
            } else {
                if lost.insert(w.channel) {
                    warn!("channel {}: worker gone, reporting failures", w.channel);
                }
                settle(service, pulses, w.channel, Err(SensorError::ReaderLost));
            }
        }

        while !pending.is_empty() {
            let next = future::or(async { Some(outcomes.receive().await) }, async {
                Timer::at(deadline).await;
                None
            });
            let Some(received) = stop.until(next).await else {
                return;
            };
            let Some(ReadOutcome { tick: of, channel, outcome }) = received else {
                break;
            };
            if of != tick || !pending.remove(&channel) {
                debug!("channel {}: late result from tick {} discarded", channel, of);
                continue;
            }
            settle(service, pulses, channel, outcome);
        }

        for channel in pending {
            warn!("channel {}: no result within {:?}", channel, deadline - started);
            settle(service, pulses, channel, Err(SensorError::NoReport));
        }

        if stop.sleep(interval.saturating_sub(started.elapsed())).await {
            break;
        }
    }
}

/// Resolve one channel for this tick and queue any pulse it triggers.
fn settle(
    service: &ControlService,
    pulses: &Channel<CriticalSectionRawMutex, HumidityPulse, PULSE_DEPTH>,
    channel: ChannelId,
    outcome: Result<Measurement, SensorError>,
) {
    let settled = service.settle_channel(channel, outcome);
    if let Some(pulse) = service.apply_reading(channel, settled.reading()) {
        if pulses.try_send(pulse).is_err() {
            warn!("HUMIDITY | pulse queue full, pulse on relay {} dropped", pulse.relay);
        }
    }
}

async fn pulse_loop(
    service: &ControlService,
    pulses: &Channel<CriticalSectionRawMutex, HumidityPulse, PULSE_DEPTH>,
    stop: ShutdownListener,
) {
    while let Some(pulse) = stop.until(pulses.receive()).await {
        if service.begin_pulse(&pulse) {
            // Cut short by shutdown; the fail-safe turns the relay off.
            stop.sleep(pulse.duration).await;
            service.end_pulse(&pulse);
        }
    }
}

async fn maintenance_loop(service: &ControlService, stop: ShutdownListener) {
    loop {
        service.maintenance_tick();
        let interval = Duration::from_millis(service.timing().maintenance_interval_ms);
        if stop.sleep(interval).await {
            break;
        }
    }
}
