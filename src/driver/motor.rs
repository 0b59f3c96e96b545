//! Hobby-servo motor driver.
//!
//! Animations are keyframe loops of target angles. The servo follows its
//! target at a bounded angular speed; `Stop` and `Home` snap straight to rest.

use super::{frame_interval, Animation, Playback};
use crate::bus::BusReceiver;
use crate::clock::millis_since;
use crate::config::schema::MotorConfig;
use crate::event::{command_enum, into_u8, MotorCmd, MotorMsg};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

command_enum! {
    pub enum MotorAnim {
        Home = 0,
        Jiggle = 1,
        Hammer = 2,
    }
}

into_u8!(MotorAnim);

impl Animation for MotorAnim {
    const NAME: &'static str = "motor";
    const COUNT: u8 = 3;
}

pub const HOME_DEG: f32 = 90.0;
pub const MAX_DEG: f32 = 180.0;

/// `(angle, hold_ms)` keyframes.
const JIGGLE: [(f32, u32); 8] = [
    (90.0, 50),
    (100.0, 50),
    (110.0, 50),
    (100.0, 50),
    (90.0, 50),
    (80.0, 50),
    (70.0, 50),
    (80.0, 50),
];
const HAMMER: [(f32, u32); 4] = [(180.0, 500), (0.0, 500), (120.0, 500), (40.0, 500)];

impl MotorAnim {
    fn keyframes(self) -> &'static [(f32, u32)] {
        match self {
            MotorAnim::Home => &[(HOME_DEG, u32::MAX)],
            MotorAnim::Jiggle => &JIGGLE,
            MotorAnim::Hammer => &HAMMER,
        }
    }
}

/// Position-controlled servo with a slew limit.
#[derive(Debug)]
pub struct Servo {
    angle: f32,
    target: f32,
    max_deg_per_sec: f32,
    min_us: u16,
    max_us: u16,
}

impl Servo {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            angle: HOME_DEG,
            target: HOME_DEG,
            max_deg_per_sec: config.max_deg_per_sec,
            min_us: config.min_us,
            max_us: config.max_us,
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn set_target(&mut self, deg: f32) {
        self.target = deg.clamp(0.0, MAX_DEG);
    }

    /// Jump without slewing.
    pub fn snap_to(&mut self, deg: f32) {
        self.set_target(deg);
        self.angle = self.target;
    }

    /// Move toward the target for `dt_ms` worth of travel.
    pub fn update(&mut self, dt_ms: u32) {
        let delta = self.target - self.angle;
        if self.max_deg_per_sec <= 0.0 {
            self.angle = self.target;
            return;
        }
        let max_step = self.max_deg_per_sec * dt_ms as f32 / 1000.0;
        self.angle += delta.clamp(-max_step, max_step);
    }

    /// Pulse width for the current angle.
    pub fn pulse_us(&self) -> u16 {
        let span = f32::from(self.max_us - self.min_us);
        self.min_us + (span * self.angle / MAX_DEG).round() as u16
    }
}

pub struct MotorDriver {
    playback: Playback<MotorAnim>,
    servo: Servo,
    keyframe: usize,
    keyframe_start: u32,
    last_update: Option<u32>,
}

impl MotorDriver {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            playback: Playback::new(),
            servo: Servo::new(config),
            keyframe: 0,
            keyframe_start: 0,
            last_update: None,
        }
    }

    pub fn servo(&self) -> &Servo {
        &self.servo
    }

    pub fn playing(&self) -> Option<MotorAnim> {
        self.playback.current()
    }

    pub fn handle(&mut self, msg: MotorMsg) {
        match msg.cmd {
            MotorCmd::Play => {
                if let Err(e) = self.playback.play(msg.param) {
                    warn!("{e}");
                }
            }
            MotorCmd::Stop => {
                self.playback.stop();
                self.servo.snap_to(HOME_DEG);
            }
            MotorCmd::Home => {
                debug!("motor homing");
                self.playback.stop();
                self.servo.snap_to(HOME_DEG);
            }
            MotorCmd::None => {}
        }
    }

    pub fn tick(&mut self, now: u32) {
        let dt = self.last_update.map_or(0, |last| now.wrapping_sub(last));
        self.last_update = Some(now);

        let Some((anim, reset)) = self.playback.next_frame() else {
            return;
        };
        let frames = anim.keyframes();

        if reset {
            self.keyframe = 0;
            self.keyframe_start = now;
            if anim == MotorAnim::Home {
                self.servo.snap_to(HOME_DEG);
            } else {
                self.servo.set_target(frames[0].0);
            }
        } else {
            self.servo.update(dt);
            let hold = frames[self.keyframe].1;
            if now.wrapping_sub(self.keyframe_start) >= hold {
                self.keyframe = (self.keyframe + 1) % frames.len();
                self.keyframe_start = now;
                self.servo.set_target(frames[self.keyframe].0);
            }
        }

        trace!(
            angle = self.servo.angle(),
            pulse_us = self.servo.pulse_us(),
            "servo"
        );
    }
}

pub async fn run(
    config: MotorConfig,
    mut commands: BusReceiver<MotorMsg>,
    cancel: CancellationToken,
) {
    let epoch = Instant::now();
    let mut driver = MotorDriver::new(&config);
    let mut interval = frame_interval(config.fps);
    info!(
        "motor task started at {} fps, {} deg/s, {}-{}us",
        config.fps, config.max_deg_per_sec, config.min_us, config.max_us
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("motor task shutting down");
                return;
            }
            _ = interval.tick() => {}
        }
        for msg in commands.drain() {
            driver.handle(msg);
        }
        driver.tick(millis_since(epoch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(driver: &mut MotorDriver, anim: MotorAnim) {
        driver.handle(MotorMsg::new(MotorCmd::Play, anim.into()));
    }

    #[test]
    fn pulse_width_spans_range() {
        let mut servo = Servo::new(&MotorConfig::default());
        assert_eq!(servo.pulse_us(), 1500);
        servo.snap_to(0.0);
        assert_eq!(servo.pulse_us(), 600);
        servo.snap_to(270.0);
        assert_eq!(servo.angle(), 180.0);
        assert_eq!(servo.pulse_us(), 2400);
    }

    #[test]
    fn jiggle_walks_keyframes_and_loops() {
        let mut d = MotorDriver::new(&MotorConfig::default());
        play(&mut d, MotorAnim::Jiggle);
        let targets: Vec<f32> = (0..10)
            .map(|i| {
                d.tick(i * 50);
                d.servo().target()
            })
            .collect();
        assert_eq!(
            targets,
            vec![90.0, 100.0, 110.0, 100.0, 90.0, 80.0, 70.0, 80.0, 90.0, 100.0]
        );
    }

    #[test]
    fn slew_is_rate_limited() {
        let mut d = MotorDriver::new(&MotorConfig::default());
        play(&mut d, MotorAnim::Hammer);
        d.tick(0);
        assert_eq!(d.servo().target(), 180.0);

        d.tick(250);
        assert!((d.servo().angle() - 120.0).abs() < 0.01);
        assert_eq!(d.servo().pulse_us(), 1800);

        d.tick(500);
        assert!((d.servo().angle() - 150.0).abs() < 0.01);
        assert_eq!(d.servo().target(), 0.0);

        d.tick(750);
        assert!((d.servo().angle() - 120.0).abs() < 0.01);
    }

    #[test]
    fn home_snaps_and_stops() {
        let mut d = MotorDriver::new(&MotorConfig::default());
        play(&mut d, MotorAnim::Hammer);
        d.tick(0);
        d.tick(400);
        assert!(d.servo().angle() > HOME_DEG);

        d.handle(MotorMsg::new(MotorCmd::Home, 0));
        assert_eq!(d.servo().angle(), HOME_DEG);
        assert_eq!(d.playing(), None);
        d.tick(800);
        assert_eq!(d.servo().angle(), HOME_DEG);
    }

    #[test]
    fn replaying_keeps_position_in_sequence() {
        let mut d = MotorDriver::new(&MotorConfig::default());
        play(&mut d, MotorAnim::Jiggle);
        d.tick(0);
        d.tick(50);
        play(&mut d, MotorAnim::Jiggle);
        d.tick(100);
        assert_eq!(d.servo().target(), 110.0);

        play(&mut d, MotorAnim::Hammer);
        d.tick(110);
        assert_eq!(d.servo().target(), 180.0);
    }

    #[test]
    fn invalid_index_is_ignored() {
        let mut d = MotorDriver::new(&MotorConfig::default());
        play(&mut d, MotorAnim::Jiggle);
        d.handle(MotorMsg::new(MotorCmd::Play, 3));
        assert_eq!(d.playing(), Some(MotorAnim::Jiggle));
    }
}
