use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use frame_ranker::config::CaptureSettings;
use frame_ranker::device::{
    DeviceConstraint, FacingMode, SyntheticConfig, SyntheticProvider, TrackLog,
};
use frame_ranker::prediction::{Prediction, RankedResult};
use frame_ranker::{
    CaptureSession, CycleOutcome, FetchOutcome, PredictionClient, Presenter, StillImage,
};

struct CapturedLog {
    records: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for CapturedLog {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

fn captured_log() -> &'static CapturedLog {
    static LOGGER: OnceLock<&'static CapturedLog> = OnceLock::new();
    LOGGER.get_or_init(|| {
        let logger: &'static CapturedLog = Box::leak(Box::new(CapturedLog {
            records: Mutex::new(Vec::new()),
        }));
        let _ = log::set_logger(logger);
        log::set_max_level(log::LevelFilter::Debug);
        logger
    })
}

/// Replays queued outcomes, then answers `[{cat, 80}]` forever.
#[derive(Clone, Default)]
struct ScriptedClient {
    script: Arc<Mutex<VecDeque<Result<FetchOutcome>>>>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedClient {
    fn push(&self, outcome: Result<FetchOutcome>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl PredictionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn predict(&self, still: &StillImage) -> Result<FetchOutcome> {
        self.seen.lock().unwrap().push(still.sequence);
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(FetchOutcome::Predictions(vec![Prediction::new("cat", 80.0)])),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingPresenter {
    renders: Arc<Mutex<Vec<RankedResult>>>,
}

impl Presenter for RecordingPresenter {
    fn render(&self, ranked: &RankedResult) -> Result<()> {
        self.renders.lock().unwrap().push(ranked.clone());
        Ok(())
    }
}

/// Holds every call for `delay` and records what it overlapped with.
#[derive(Clone)]
struct SlowClient {
    delay: Duration,
    tracks: TrackLog,
    state: Arc<SlowState>,
}

#[derive(Default)]
struct SlowState {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<SlowCall>>,
}

#[derive(Clone, Debug)]
struct SlowCall {
    sequence: u64,
    started: Instant,
    /// Live track ids when the call began and when it returned.
    live_at_start: Vec<u64>,
    live_at_finish: Vec<u64>,
}

fn live_ids(tracks: &TrackLog) -> Vec<u64> {
    tracks
        .records()
        .iter()
        .filter(|r| !r.stopped)
        .map(|r| r.id)
        .collect()
}

impl SlowClient {
    fn new(delay: Duration, tracks: TrackLog) -> Self {
        Self {
            delay,
            tracks,
            state: Arc::new(SlowState::default()),
        }
    }

    fn calls(&self) -> Vec<SlowCall> {
        self.state.calls.lock().unwrap().clone()
    }

    fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PredictionClient for SlowClient {
    fn name(&self) -> &str {
        "slow"
    }

    fn predict(&self, still: &StillImage) -> Result<FetchOutcome> {
        let started = Instant::now();
        let live_at_start = live_ids(&self.tracks);
        let now_in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        thread::sleep(self.delay);

        self.state.calls.lock().unwrap().push(SlowCall {
            sequence: still.sequence,
            started,
            live_at_start,
            live_at_finish: live_ids(&self.tracks),
        });
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchOutcome::Predictions(vec![Prediction::new("cat", 80.0)]))
    }
}

fn build(
    source: &str,
    interval: Duration,
) -> Result<(CaptureSession, TrackLog, ScriptedClient, RecordingPresenter)> {
    let client = ScriptedClient::default();
    let handle: Box<dyn PredictionClient> = Box::new(client.clone());
    let (session, tracks, presenter) = build_with(source, interval, move |_| handle)?;
    Ok((session, tracks, client, presenter))
}

fn build_with(
    source: &str,
    interval: Duration,
    make_client: impl FnOnce(&TrackLog) -> Box<dyn PredictionClient>,
) -> Result<(CaptureSession, TrackLog, RecordingPresenter)> {
    let provider = SyntheticProvider::new(SyntheticConfig::from_url(source, 32, 24)?);
    let tracks = provider.track_log();
    let client = make_client(&tracks);
    let presenter = RecordingPresenter::default();
    let capture = CaptureSettings {
        interval,
        ..CaptureSettings::default()
    };
    let session = CaptureSession::new(
        Box::new(provider),
        client,
        Box::new(presenter.clone()),
        &capture,
        5,
    );
    Ok((session, tracks, presenter))
}

fn slow_session(
    source: &str,
    interval: Duration,
    delay: Duration,
) -> Result<(CaptureSession, TrackLog, SlowClient)> {
    let mut slow = None;
    let (session, tracks, _) = build_with(source, interval, |tracks| {
        let client = SlowClient::new(delay, tracks.clone());
        slow = Some(client.clone());
        Box::new(client) as Box<dyn PredictionClient>
    })?;
    let slow = slow.ok_or_else(|| anyhow!("client was not built"))?;
    Ok((session, tracks, slow))
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn falls_back_to_any_camera_with_warning() -> Result<()> {
    let logger = captured_log();
    let (mut session, tracks, _, _) = build("stub://desk?facing=user", Duration::from_secs(60))?;

    let acquisition = session.start_camera(true)?;
    assert!(acquisition.fell_back());
    assert_eq!(
        acquisition.requested,
        DeviceConstraint::Exact(FacingMode::Environment)
    );
    assert_eq!(acquisition.opened, DeviceConstraint::Any);
    assert!(session.has_device());

    let records = tracks.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].facing, FacingMode::User);
    assert_eq!(records[0].opened_with, DeviceConstraint::Any);

    let warned = logger.records.lock().unwrap().iter().any(|(level, msg)| {
        *level == log::Level::Warn
            && msg.contains("exact:environment")
            && msg.contains("stub://desk")
    });
    assert!(warned, "fallback must be logged as a warning");
    Ok(())
}

#[test]
fn no_camera_at_all_is_fatal() -> Result<()> {
    let (mut session, tracks, _, _) = build("stub://none?facing=", Duration::from_secs(60))?;
    let err = session
        .start_camera(true)
        .err()
        .ok_or_else(|| anyhow!("acquisition should fail"))?;
    assert!(format!("{:#}", err).contains("no capture device available"));
    assert!(!session.is_sampling());
    assert_eq!(session.active_timers(), 0);
    assert!(tracks.records().is_empty());
    Ok(())
}

#[test]
fn restarting_camera_keeps_single_timer() -> Result<()> {
    let (mut session, tracks, _, _) = build("stub://phone", Duration::from_millis(50))?;

    session.start_camera(true)?;
    session.start_camera(false)?;
    assert!(session.is_sampling());
    assert_eq!(session.active_timers(), 1);

    let records = tracks.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].stopped, "previous track must be stopped");
    assert_eq!(records[0].facing, FacingMode::Environment);
    assert!(!records[1].stopped);
    assert_eq!(records[1].facing, FacingMode::User);
    assert_eq!(tracks.live(), 1);

    session.stop()?;
    assert_eq!(session.active_timers(), 0);
    assert_eq!(tracks.live(), 0);
    Ok(())
}

#[test]
fn restart_keeps_history() -> Result<()> {
    let (mut session, _, _, _) = build("stub://phone", Duration::from_secs(60))?;
    session.start_camera(true)?;
    session.sample_once()?;
    session.sample_once()?;
    session.start_camera(false)?;
    assert_eq!(session.history_len()?, 2);
    Ok(())
}

#[test]
fn non_success_status_is_not_ingested() -> Result<()> {
    let (mut session, _, client, presenter) = build("stub://cam", Duration::from_secs(60))?;
    session.start_camera(true)?;

    session.sample_once()?;
    client.push(Ok(FetchOutcome::Rejected { status: 503 }));
    assert_eq!(
        session.sample_once()?,
        CycleOutcome::Rejected { status: 503 }
    );
    assert_eq!(session.history_len()?, 1);

    let ranked = session.ranked()?;
    assert_eq!(ranked.to_rendered()[0].confidence, "80.00");
    assert_eq!(presenter.renders.lock().unwrap().len(), 1);
    assert_eq!(session.stats().rejected, 1);
    Ok(())
}

#[test]
fn empty_success_dilutes_scores() -> Result<()> {
    let (mut session, _, client, _) = build("stub://cam", Duration::from_secs(60))?;
    session.start_camera(true)?;

    session.sample_once()?;
    client.push(Ok(FetchOutcome::Predictions(Vec::new())));
    let outcome = session.sample_once()?;
    let CycleOutcome::Ingested(ranked) = outcome else {
        return Err(anyhow!("empty prediction set should be ingested"));
    };
    assert_eq!(session.history_len()?, 2);
    assert_eq!(ranked.to_rendered()[0].confidence, "40.00");
    Ok(())
}

#[test]
fn transport_failures_do_not_stop_sampling() -> Result<()> {
    let (mut session, _, client, presenter) = build("stub://cam", Duration::from_millis(20))?;
    client.push(Err(anyhow!("connection refused")));
    client.push(Ok(FetchOutcome::Rejected { status: 500 }));
    client.push(Err(anyhow!("connection reset")));

    session.start_camera(true)?;
    let ingested = wait_until(Duration::from_secs(5), || session.stats().ingested >= 2);
    session.stop()?;

    assert!(ingested, "sampling should continue after failures");
    let stats = session.stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.rejected, 1);
    assert!(!presenter.renders.lock().unwrap().is_empty());

    let seen = client.seen();
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[test]
fn stop_releases_and_clears() -> Result<()> {
    let (mut session, tracks, _, _) = build("stub://cam", Duration::from_secs(60))?;
    session.start_camera(true)?;
    session.sample_once()?;
    session.stop()?;

    assert_eq!(session.history_len()?, 0);
    assert!(session.ranked()?.is_empty());
    assert_eq!(tracks.live(), 0);
    assert_eq!(session.sample_once()?, CycleOutcome::Skipped);
    Ok(())
}

#[test]
fn dropping_session_releases_device() -> Result<()> {
    let (mut session, tracks, _, _) = build("stub://cam", Duration::from_millis(20))?;
    session.start_camera(true)?;
    assert_eq!(tracks.live(), 1);
    drop(session);
    assert_eq!(tracks.live(), 0);
    Ok(())
}

#[test]
fn first_cycle_waits_one_interval() -> Result<()> {
    let interval = Duration::from_millis(250);
    let (mut session, _, client) = slow_session("stub://cam", interval, Duration::ZERO)?;

    let started = Instant::now();
    session.start_camera(true)?;
    thread::sleep(interval / 2);
    assert!(client.calls().is_empty(), "no cycle before one interval");

    let sampled = wait_until(Duration::from_secs(5), || !client.calls().is_empty());
    session.stop()?;

    assert!(sampled);
    let first = &client.calls()[0];
    assert!(first.started.duration_since(started) >= interval);
    Ok(())
}

#[test]
fn overrunning_cycles_never_overlap() -> Result<()> {
    let interval = Duration::from_millis(150);
    let delay = Duration::from_millis(300);
    let (mut session, _, client) = slow_session("stub://cam", interval, delay)?;

    session.start_camera(true)?;
    let done = wait_until(Duration::from_secs(10), || client.calls().len() >= 3);
    session.stop()?;

    assert!(done, "expected at least three cycles");
    assert_eq!(client.max_in_flight(), 1);
    assert_eq!(client.in_flight(), 0);

    let calls = client.calls();
    for pair in calls.windows(2) {
        let gap = pair[1].started.duration_since(pair[0].started);
        assert!(gap >= delay, "next cycle started while one was running");
        // An overrun starts the next cycle right away instead of waiting
        // another full interval.
        assert!(gap < delay + interval, "overrun waited a full interval: {:?}", gap);
        assert!(pair[0].sequence < pair[1].sequence);
    }
    Ok(())
}

#[test]
fn switching_camera_waits_for_in_flight_cycle() -> Result<()> {
    let delay = Duration::from_millis(300);
    let (mut session, tracks, client) =
        slow_session("stub://phone", Duration::from_millis(50), delay)?;

    session.start_camera(true)?;
    assert!(wait_until(Duration::from_secs(5), || client.in_flight() == 1));
    let old_track = tracks.records()[0].id;

    session.start_camera(false)?;

    // The cycle that was running has finished and been ingested.
    assert_eq!(client.in_flight(), 0);
    assert_eq!(session.stats().ingested, 1);
    assert_eq!(session.history_len()?, 1);
    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].live_at_start, vec![old_track]);
    assert!(
        calls[0].live_at_finish.contains(&old_track),
        "old track released before its cycle completed"
    );
    assert!(tracks.records()[0].stopped);

    assert!(wait_until(Duration::from_secs(5), || client.calls().len() >= 2));
    session.stop()?;

    let calls = client.calls();
    assert_eq!(client.max_in_flight(), 1);
    for call in &calls[1..] {
        assert!(
            !call.live_at_start.contains(&old_track),
            "cycle sampled after the switch saw the old track"
        );
        assert!(call.sequence > calls[0].sequence);
    }
    Ok(())
}
