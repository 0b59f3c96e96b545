//! Proximity detection.
//!
//! Raw ranges are sorted into close / neutral / far bands. Consecutive
//! readings in a band build a streak; a single reading outside the band resets
//! it. Zone changes require a full streak, and only a confirmed far-to-close
//! change produces a local trigger.

pub mod sensor;

use crate::bus::BusSender;
use crate::config::schema::DetectorConfig;
use crate::event::{ShowCmd, ShowInput};
use crate::faults::{Fault, FaultRegister};
use sensor::Sensor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A reading of 0 means "no target"; it is treated as this range.
pub const NO_TARGET_MM: u32 = 2500;
pub const MAX_STREAK: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Unknown,
    Far,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Close,
    Neutral,
    Far,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub close_mm: u32,
    pub far_mm: u32,
    pub min_close_readings: u16,
    pub min_far_readings: u16,
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            close_mm: config.close_mm,
            far_mm: config.far_mm,
            min_close_readings: config.min_close_readings,
            min_far_readings: config.min_far_readings,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&DetectorConfig::default())
    }
}

#[derive(Debug)]
pub struct Detector {
    thresholds: Thresholds,
    zone: Zone,
    close_streak: u16,
    far_streak: u16,
}

impl Detector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            zone: Zone::Unknown,
            close_streak: 0,
            far_streak: 0,
        }
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    fn classify(&self, range_mm: u32) -> Band {
        let range_mm = if range_mm == 0 { NO_TARGET_MM } else { range_mm };
        if range_mm <= self.thresholds.close_mm {
            Band::Close
        } else if range_mm >= self.thresholds.far_mm {
            Band::Far
        } else {
            Band::Neutral
        }
    }

    /// Process one sample. Returns the trigger to publish, if this sample
    /// confirmed an approach.
    pub fn feed(&mut self, range_mm: u32) -> Option<ShowInput> {
        match self.classify(range_mm) {
            Band::Close => {
                self.close_streak = (self.close_streak + 1).min(MAX_STREAK);
                self.far_streak = 0;
            }
            Band::Far => {
                self.close_streak = 0;
                self.far_streak = (self.far_streak + 1).min(MAX_STREAK);
            }
            Band::Neutral => {
                self.close_streak = 0;
                self.far_streak = 0;
            }
        }

        match self.zone {
            // Must see a clear area before anything can trigger.
            Zone::Unknown if self.far_streak >= self.thresholds.min_far_readings => {
                debug!("detector armed");
                self.zone = Zone::Far;
                None
            }
            Zone::Far if self.close_streak >= self.thresholds.min_close_readings => {
                info!("proximity trigger at {range_mm}mm");
                self.zone = Zone::Close;
                Some(ShowInput::new(ShowCmd::TriggerLocal, 0))
            }
            Zone::Close if self.far_streak >= self.thresholds.min_far_readings => {
                debug!("detector re-armed");
                self.zone = Zone::Far;
                None
            }
            _ => None,
        }
    }
}

/// Latest sample, readable by the console.
#[derive(Debug, Default)]
pub struct ProximityStatus {
    range_mm: AtomicU32,
    zone: AtomicU32,
}

impl ProximityStatus {
    fn record(&self, range_mm: u32, zone: Zone) {
        self.range_mm.store(range_mm, Ordering::Relaxed);
        self.zone.store(zone as u32, Ordering::Relaxed);
    }

    pub fn range_mm(&self) -> u32 {
        self.range_mm.load(Ordering::Relaxed)
    }

    pub fn zone(&self) -> Zone {
        match self.zone.load(Ordering::Relaxed) {
            1 => Zone::Far,
            2 => Zone::Close,
            _ => Zone::Unknown,
        }
    }
}

/// Sample the sensor at a fixed rate until cancelled.
///
/// A sensor that fails to initialize leaves the zone `Unknown` for good; the
/// task keeps its schedule so nothing else notices.
pub async fn run(
    config: DetectorConfig,
    show: BusSender<ShowInput>,
    status: Arc<ProximityStatus>,
    faults: Arc<FaultRegister>,
    cancel: CancellationToken,
) {
    let mut sensor = Sensor::from_config(&config);
    let mut detector = Detector::new(Thresholds::from(&config));

    let online = match sensor.init().await {
        Ok(()) => true,
        Err(e) => {
            warn!("proximity sensor offline: {e}");
            faults.set(Fault::TofSensorInit);
            false
        }
    };

    let period = Duration::from_millis(u64::from(1000 / config.fps.max(1)));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("proximity task started, {}ms period", period.as_millis());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("proximity task shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        if !online {
            continue;
        }
        for range_mm in sensor.read_samples().await {
            if let Some(trigger) = detector.feed(range_mm) {
                show.publish(trigger);
            }
            status.record(range_mm, detector.zone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAR: u32 = 1500;
    const CLOSE: u32 = 500;
    const MID: u32 = 850;

    fn feed_all(detector: &mut Detector, readings: &[u32]) -> usize {
        readings
            .iter()
            .filter_map(|&r| detector.feed(r))
            .inspect(|t| assert_eq!(t.cmd, ShowCmd::TriggerLocal))
            .count()
    }

    fn armed() -> Detector {
        let mut d = Detector::new(Thresholds::default());
        assert_eq!(feed_all(&mut d, &[FAR; 10]), 0);
        assert_eq!(d.zone(), Zone::Far);
        d
    }

    #[test]
    fn needs_clear_area_before_triggering() {
        let mut d = Detector::new(Thresholds::default());
        assert_eq!(feed_all(&mut d, &[CLOSE; 20]), 0);
        assert_eq!(d.zone(), Zone::Unknown);

        assert_eq!(feed_all(&mut d, &[FAR; 9]), 0);
        assert_eq!(d.zone(), Zone::Unknown);
        assert_eq!(feed_all(&mut d, &[FAR]), 0);
        assert_eq!(d.zone(), Zone::Far);
    }

    #[test]
    fn three_close_readings_trigger_once() {
        let mut d = armed();
        assert_eq!(feed_all(&mut d, &[CLOSE, CLOSE, CLOSE]), 1);
        assert_eq!(d.zone(), Zone::Close);
        assert_eq!(feed_all(&mut d, &[CLOSE; 200]), 0);
    }

    #[test]
    fn isolated_close_reading_does_not_trigger() {
        let mut d = armed();
        assert_eq!(feed_all(&mut d, &[CLOSE, MID, CLOSE, FAR, CLOSE]), 0);
        assert_eq!(d.zone(), Zone::Far);
    }

    #[test]
    fn rearm_needs_full_far_streak() {
        let mut d = armed();
        assert_eq!(feed_all(&mut d, &[CLOSE, CLOSE]), 1);

        // Nine far readings, then a flicker: streak resets.
        let mut readings = vec![FAR; 9];
        readings.push(MID);
        readings.extend([FAR; 9]);
        readings.extend([CLOSE, CLOSE]);
        assert_eq!(feed_all(&mut d, &readings), 0);
        assert_eq!(d.zone(), Zone::Close);

        assert_eq!(feed_all(&mut d, &[FAR; 10]), 0);
        assert_eq!(d.zone(), Zone::Far);
        assert_eq!(feed_all(&mut d, &[CLOSE, CLOSE]), 1);
    }

    #[test]
    fn no_target_counts_as_far() {
        let mut d = Detector::new(Thresholds::default());
        assert_eq!(feed_all(&mut d, &[0; 10]), 0);
        assert_eq!(d.zone(), Zone::Far);
    }

    #[test]
    fn threshold_edges_are_inclusive() {
        let mut d = Detector::new(Thresholds::default());
        feed_all(&mut d, &[1000; 10]);
        assert_eq!(d.zone(), Zone::Far);
        assert_eq!(feed_all(&mut d, &[750, 750]), 1);
    }

    #[test]
    fn streaks_saturate() {
        let mut d = armed();
        feed_all(&mut d, &[FAR; 500]);
        assert_eq!(d.far_streak, MAX_STREAK);
        feed_all(&mut d, &[CLOSE]);
        assert_eq!(d.far_streak, 0);
        assert_eq!(d.close_streak, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn task_publishes_trigger_from_scripted_sensor() {
        use crate::bus;
        use crate::config::schema::{BusConfig, SensorKind};

        let (bus, mut ends) = bus::create(&BusConfig::default()).unwrap();
        let mut readings = vec![FAR; 10];
        readings.extend([CLOSE; 5]);
        let config = DetectorConfig {
            sensor: SensorKind::Scripted,
            readings,
            ..DetectorConfig::default()
        };
        let status = Arc::new(ProximityStatus::default());
        let faults = Arc::new(FaultRegister::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            config,
            bus.show.clone(),
            status.clone(),
            faults.clone(),
            cancel.clone(),
        ));

        let trigger = ends.show.recv().await.unwrap();
        assert_eq!(trigger.cmd, ShowCmd::TriggerLocal);
        cancel.cancel();
        task.await.unwrap();
        assert!(!faults.is_active(Fault::TofSensorInit));
        assert_eq!(status.zone(), Zone::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_sensor_sets_fault_and_keeps_running() {
        use crate::bus;
        use crate::config::schema::{BusConfig, SensorKind};

        let (bus, mut ends) = bus::create(&BusConfig::default()).unwrap();
        let config = DetectorConfig {
            sensor: SensorKind::None,
            ..DetectorConfig::default()
        };
        let faults = Arc::new(FaultRegister::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            config,
            bus.show.clone(),
            Arc::new(ProximityStatus::default()),
            faults.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(faults.is_active(Fault::TofSensorInit));
        assert!(!task.is_finished());
        assert!(ends.show.try_recv().is_none());

        cancel.cancel();
        task.await.unwrap();
    }
}
