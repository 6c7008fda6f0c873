//! Capture session: device, sampling worker and rolling history in one owner.
//!
//! A `CaptureSession` is the only place the pipeline state lives. At most one
//! sampling worker runs per session. The worker waits for each cycle to finish
//! before scheduling the next one, so cycles never overlap; when a cycle runs
//! past its slot the next one starts immediately.
//!
//! Replacing the camera or stopping the session cancels the worker and joins
//! it before the device is touched. A response still in flight at that point
//! belongs to a cycle that has to finish first, so nothing captured from the
//! old device can be ingested after the switch.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::{client_for_endpoint, FetchOutcome, PredictionClient};
use crate::config::{CaptureSettings, RankerdConfig};
use crate::device::{self, open_provider, Acquisition, DeviceAcquirer, DeviceProvider, VideoHandle};
use crate::prediction::RankedResult;
use crate::presenter::{presenter_for, Presenter};
use crate::sampler::FrameSampler;
use crate::smoothing::{Ingested, SmoothingEngine};

/// Result of one sampling cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// No active video handle.
    Skipped,
    /// The frame could not be grabbed or encoded.
    EncodeFailed,
    Ingested(RankedResult),
    /// The response was older than the last ingested one.
    Stale { sequence: u64, last: u64 },
    /// The endpoint answered with a non-2xx status.
    Rejected { status: u16 },
    /// Transport or decoding failure.
    Failed,
}

/// Counters since the session was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub cycles: u64,
    pub skipped: u64,
    pub ingested: u64,
    pub rejected: u64,
    pub failed: u64,
    pub stale: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    skipped: AtomicU64,
    ingested: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the session and its sampling worker.
struct Pipeline {
    current: Mutex<Option<Box<dyn VideoHandle>>>,
    sampler: FrameSampler,
    client: Box<dyn PredictionClient>,
    engine: Mutex<SmoothingEngine>,
    presenter: Box<dyn Presenter>,
    counters: Counters,
}

impl Pipeline {
    fn run_cycle(&self) -> Result<CycleOutcome> {
        Counters::bump(&self.counters.cycles);

        let still = {
            let mut current = self
                .current
                .lock()
                .map_err(|_| anyhow!("video handle lock poisoned"))?;
            let Some(handle) = current.as_mut() else {
                log::debug!("no active video handle; cycle skipped");
                Counters::bump(&self.counters.skipped);
                return Ok(CycleOutcome::Skipped);
            };
            match self.sampler.sample(handle.as_mut()) {
                Ok(still) => still,
                Err(err) => {
                    log::warn!("frame capture failed, cycle skipped: {:#}", err);
                    Counters::bump(&self.counters.skipped);
                    return Ok(CycleOutcome::EncodeFailed);
                }
            }
        };

        let predictions = match self.client.predict(&still) {
            Ok(FetchOutcome::Predictions(predictions)) => predictions,
            Ok(FetchOutcome::Rejected { status }) => {
                log::warn!(
                    "{} endpoint answered {} for frame {}; no data this cycle",
                    self.client.name(),
                    status,
                    still.sequence
                );
                Counters::bump(&self.counters.rejected);
                return Ok(CycleOutcome::Rejected { status });
            }
            Err(err) => {
                log::error!("prediction for frame {} failed: {:#}", still.sequence, err);
                Counters::bump(&self.counters.failed);
                return Ok(CycleOutcome::Failed);
            }
        };

        let ingested = self
            .engine
            .lock()
            .map_err(|_| anyhow!("smoothing engine lock poisoned"))?
            .ingest_sequenced(still.sequence, predictions);
        match ingested {
            Ingested::Ranked(ranked) => {
                Counters::bump(&self.counters.ingested);
                if let Err(err) = self.presenter.render(&ranked) {
                    log::warn!("presenter failed: {:#}", err);
                }
                Ok(CycleOutcome::Ingested(ranked))
            }
            Ingested::Stale { sequence, last } => {
                Counters::bump(&self.counters.stale);
                Ok(CycleOutcome::Stale { sequence, last })
            }
        }
    }
}

/// Handle to a running sampling worker.
struct SamplingTimer {
    stop_tx: mpsc::Sender<()>,
    worker: thread::JoinHandle<()>,
}

/// Decrements the live-worker count when the worker exits, panics included.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SamplingTimer {
    fn spawn(
        pipeline: Arc<Pipeline>,
        interval: Duration,
        active: Arc<AtomicUsize>,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(active);
        let worker = thread::Builder::new()
            .name("frame-sampler".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut deadline = Instant::now() + interval;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if let Err(err) = pipeline.run_cycle() {
                        log::error!("sampling cycle aborted: {:#}", err);
                    }
                    deadline += interval;
                    let now = Instant::now();
                    if deadline < now {
                        deadline = now;
                    }
                }
            })?;
        Ok(Self { stop_tx, worker })
    }

    fn cancel(self) {
        let _ = self.stop_tx.send(());
        if self.worker.join().is_err() {
            log::error!("sampling worker panicked");
        }
    }
}

/// Owns the device, the sampling worker and the smoothing history.
pub struct CaptureSession {
    acquirer: DeviceAcquirer,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    timer: Option<SamplingTimer>,
    active_timers: Arc<AtomicUsize>,
}

impl CaptureSession {
    pub fn new(
        provider: Box<dyn DeviceProvider>,
        client: Box<dyn PredictionClient>,
        presenter: Box<dyn Presenter>,
        capture: &CaptureSettings,
        window: usize,
    ) -> Self {
        let pipeline = Pipeline {
            current: Mutex::new(None),
            sampler: FrameSampler::new(capture),
            client,
            engine: Mutex::new(SmoothingEngine::new(window)),
            presenter,
            counters: Counters::default(),
        };
        Self {
            acquirer: DeviceAcquirer::new(provider),
            pipeline: Arc::new(pipeline),
            interval: capture.interval,
            timer: None,
            active_timers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Session wired from a loaded config: device provider, endpoint client
    /// and presenter are all chosen by their settings.
    pub fn from_config(config: &RankerdConfig) -> Result<Self> {
        let provider = open_provider(&config.device)?;
        let client = client_for_endpoint(&config.endpoint)?;
        let presenter = presenter_for(&config.presenter);
        log::info!(
            "capture session: device {} via {}, endpoint {} ({}), every {} ms, window {}",
            config.device.source,
            provider.name(),
            config.endpoint.url,
            client.name(),
            config.capture.interval.as_millis(),
            config.window
        );
        Ok(Self::new(
            provider,
            client,
            presenter,
            &config.capture,
            config.window,
        ))
    }

    /// Acquire a camera and (re)start sampling.
    ///
    /// Any running worker is cancelled and joined first, then the previous
    /// handle is released and a new one acquired. History is kept. If no
    /// device can be opened the error is returned and sampling stays off.
    pub fn start_camera(&mut self, prefer_back: bool) -> Result<Acquisition> {
        self.cancel_timer();
        let acquisition = {
            let mut current = self
                .pipeline
                .current
                .lock()
                .map_err(|_| anyhow!("video handle lock poisoned"))?;
            self.acquirer.acquire(&mut current, prefer_back)?
        };
        self.timer = Some(SamplingTimer::spawn(
            Arc::clone(&self.pipeline),
            self.interval,
            Arc::clone(&self.active_timers),
        )?);
        log::info!(
            "sampling {} every {} ms",
            acquisition.description,
            self.interval.as_millis()
        );
        Ok(acquisition)
    }

    /// Cancel sampling, release the device and clear the history.
    pub fn stop(&mut self) -> Result<()> {
        self.cancel_timer();
        {
            let mut current = self
                .pipeline
                .current
                .lock()
                .map_err(|_| anyhow!("video handle lock poisoned"))?;
            device::release(&mut current);
        }
        self.pipeline
            .engine
            .lock()
            .map_err(|_| anyhow!("smoothing engine lock poisoned"))?
            .clear();
        Ok(())
    }

    /// Run one cycle on the calling thread.
    pub fn sample_once(&self) -> Result<CycleOutcome> {
        self.pipeline.run_cycle()
    }

    /// Current ranking over the history window.
    pub fn ranked(&self) -> Result<RankedResult> {
        Ok(self
            .pipeline
            .engine
            .lock()
            .map_err(|_| anyhow!("smoothing engine lock poisoned"))?
            .ranked())
    }

    pub fn history_len(&self) -> Result<usize> {
        Ok(self
            .pipeline
            .engine
            .lock()
            .map_err(|_| anyhow!("smoothing engine lock poisoned"))?
            .len())
    }

    pub fn window(&self) -> Result<usize> {
        Ok(self
            .pipeline
            .engine
            .lock()
            .map_err(|_| anyhow!("smoothing engine lock poisoned"))?
            .window())
    }

    pub fn is_sampling(&self) -> bool {
        self.timer.is_some()
    }

    /// Number of sampling workers alive for this session.
    pub fn active_timers(&self) -> usize {
        self.active_timers.load(Ordering::SeqCst)
    }

    pub fn has_device(&self) -> bool {
        self.pipeline
            .current
            .lock()
            .map(|current| current.is_some())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> SessionStats {
        self.pipeline.counters.snapshot()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel_timer();
        if let Ok(mut current) = self.pipeline.current.lock() {
            device::release(&mut current);
        }
    }
}
