//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Periodic data and animation tasks driving the simulation."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use std::io::{BufRead, Seek};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tms_common::config::{AnimationConfig, AppConfig, ClockConfig};
use tms_common::time::{duration_to_millis, jitter_us};
use tms_rt::{RateLimiter, TaskGroup};
use tms_sim::{AlertSink, Animator, GaugeRenderer, SimulationClock};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

const DATA_TASK: &str = "simulation-data";
const FRAME_TASK: &str = "gauge-frames";

/// Scheduler configuration; `start` turns it into a running [`SchedulerHandle`].
#[derive(Debug, Clone)]
pub struct SimulationScheduler {
    clock: ClockConfig,
    animation: AnimationConfig,
}

impl SimulationScheduler {
    pub fn new(clock: ClockConfig, animation: AnimationConfig) -> Self {
        Self { clock, animation }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.clock.clone(), config.animation.clone())
    }

    /// Spawn the data tick and the animation frame tasks.
    ///
    /// The first data tick fires after the configured initial delay. `alerts`
    /// is subscribed to every tank before the first tick and `renderer`
    /// receives one call per live gauge job per frame.
    pub async fn start<R>(
        self,
        mut clock: SimulationClock<R>,
        animator: Arc<Animator>,
        alerts: Arc<dyn AlertSink>,
        renderer: Arc<dyn GaugeRenderer>,
    ) -> Result<SchedulerHandle>
    where
        R: BufRead + Seek + Send + 'static,
    {
        self.clock
            .validate()
            .with_context(|| "invalid clock configuration")?;
        self.animation
            .validate()
            .with_context(|| "invalid animation configuration")?;

        clock.subscribe(alerts);
        for tank in clock.tanks() {
            animator.register_tank(tank);
        }

        let (speed_tx, speed_rx) = watch::channel(self.clock.speed);
        let (error_tx, error_rx) = watch::channel(None);
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::new(AtomicU32::new(clock.counter()));
        let frames = Arc::new(AtomicU64::new(0));
        let mut tasks = TaskGroup::new();

        let data = DataLoop {
            clock,
            animator: animator.clone(),
            clock_config: self.clock.clone(),
            speed: speed_rx,
            errors: error_tx,
            ticks: ticks.clone(),
            counter: counter.clone(),
        };
        tasks.spawn(DATA_TASK, move |shutdown| data.run(shutdown));

        let frame_animator = animator.clone();
        let frame_counter = frames.clone();
        let frame_period = self.animation.frame_period();
        tasks.spawn(FRAME_TASK, move |shutdown| {
            run_frames(
                frame_animator,
                renderer,
                frame_period,
                frame_counter,
                shutdown,
            )
        });

        info!(
            speed = self.clock.speed,
            interval_ms = duration_to_millis(self.clock.interval_for(self.clock.speed)),
            initial_delay_ms = duration_to_millis(self.clock.initial_delay),
            frame_period_ms = duration_to_millis(frame_period),
            "simulation scheduler started"
        );

        Ok(SchedulerHandle {
            clock: self.clock,
            speed: speed_tx,
            errors: error_rx,
            ticks,
            counter,
            frames,
            animator,
            tasks,
        })
    }
}

/// Point-in-time view of a running scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub speed: u32,
    pub interval_ms: u64,
    pub ticks: u64,
    /// Ticks since the last threshold recompute.
    pub recompute_counter: u32,
    pub frames: u64,
    pub live_jobs: usize,
    pub last_error: Option<String>,
}

/// Control surface for the running simulation.
#[derive(Debug)]
pub struct SchedulerHandle {
    clock: ClockConfig,
    speed: watch::Sender<u32>,
    errors: watch::Receiver<Option<String>>,
    ticks: Arc<AtomicU64>,
    counter: Arc<AtomicU32>,
    frames: Arc<AtomicU64>,
    animator: Arc<Animator>,
    tasks: TaskGroup,
}

impl SchedulerHandle {
    /// Change the data tick speed. The next tick fires immediately and the
    /// tick counter is not reset.
    pub fn set_speed(&self, speed: u32) -> Result<()> {
        if !(self.clock.min_speed..=self.clock.max_speed).contains(&speed) {
            bail!(
                "speed {} outside [{}, {}]",
                speed,
                self.clock.min_speed,
                self.clock.max_speed
            );
        }
        self.speed
            .send(speed)
            .map_err(|_| anyhow!("simulation data task is no longer running"))?;
        Ok(())
    }

    pub fn speed(&self) -> u32 {
        *self.speed.borrow()
    }

    pub fn interval(&self) -> Duration {
        self.clock.interval_for(self.speed())
    }

    /// Data ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Clock counter after the latest tick; it is not reset by speed changes.
    pub fn recompute_counter(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Gauge frames handed to the renderer so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn animator(&self) -> &Arc<Animator> {
        &self.animator
    }

    /// Error that stopped the data task, if any.
    pub fn last_error(&self) -> Option<String> {
        self.errors.borrow().clone()
    }

    /// Resolves when the data task fails, or with `None` once it has stopped
    /// cleanly.
    pub async fn failure(&self) -> Option<String> {
        let mut errors = self.errors.clone();
        loop {
            if let Some(err) = errors.borrow_and_update().clone() {
                return Some(err);
            }
            if errors.changed().await.is_err() {
                return errors.borrow().clone();
            }
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            speed: self.speed(),
            interval_ms: duration_to_millis(self.interval()),
            ticks: self.ticks(),
            recompute_counter: self.recompute_counter(),
            frames: self.frames(),
            live_jobs: self.animator.live_jobs(),
            last_error: self.last_error(),
        }
    }

    /// Stop both tasks and release the measurement stream. Returns the error
    /// that ended the data task early, if there was one.
    pub async fn stop(self) -> Result<()> {
        let ticks = self.ticks();
        let frames = self.frames();
        let outcome = self.tasks.shutdown().await;
        info!(ticks, frames, "simulation scheduler stopped");
        outcome
    }
}

struct DataLoop<R> {
    clock: SimulationClock<R>,
    animator: Arc<Animator>,
    clock_config: ClockConfig,
    speed: watch::Receiver<u32>,
    errors: watch::Sender<Option<String>>,
    ticks: Arc<AtomicU64>,
    counter: Arc<AtomicU32>,
}

impl<R: BufRead + Seek> DataLoop<R> {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut period = self.clock_config.interval_for(*self.speed.borrow_and_update());
        let mut limiter = RateLimiter::starting_after(self.clock_config.initial_delay, period);
        let mut previous: Option<Instant> = None;

        let outcome = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("data task shutdown signal received");
                    break Ok(());
                }
                changed = self.speed.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    let speed = *self.speed.borrow_and_update();
                    period = self.clock_config.interval_for(speed);
                    limiter.set_period(period);
                    previous = None;
                    info!(speed, interval_ms = duration_to_millis(period), "simulation speed changed");
                }
                instant = limiter.tick() => {
                    let jitter = previous
                        .map(|last| jitter_us(instant.duration_since(last), period))
                        .unwrap_or(0);
                    previous = Some(instant);

                    match self.clock.tick() {
                        Ok(report) => {
                            self.ticks.store(report.tick, Ordering::Relaxed);
                            self.counter.store(self.clock.counter(), Ordering::Relaxed);
                            for tank in self.clock.tanks() {
                                self.animator.track_tank(tank);
                            }
                            debug!(
                                tick = report.tick,
                                tank_id = report.measurement.tank_id,
                                value = report.measurement.value,
                                applied = report.applied_to.is_some(),
                                recomputed = report.recomputed.is_some(),
                                jitter_us = jitter,
                                "simulation tick"
                            );
                        }
                        Err(err) => {
                            error!(tick = self.clock.ticks(), error = %err, "simulation tick aborted");
                            break Err(anyhow::Error::new(err).context("simulation tick failed"));
                        }
                    }
                }
            }
        };

        // Speed changes must be refused before the failure becomes visible.
        let DataLoop {
            clock,
            speed,
            errors,
            ..
        } = self;
        drop(speed);
        clock.close();
        if let Err(err) = &outcome {
            let _ = errors.send(Some(format!("{:#}", err)));
        }
        outcome
    }
}

async fn run_frames(
    animator: Arc<Animator>,
    renderer: Arc<dyn GaugeRenderer>,
    period: Duration,
    frames: Arc<AtomicU64>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut limiter = RateLimiter::new(period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("frame task shutdown signal received");
                return Ok(());
            }
            _ = limiter.tick() => {
                let emitted = animator.advance_all(renderer.as_ref());
                frames.fetch_add(emitted as u64, Ordering::Relaxed);
            }
        }
    }
}
