use crate::show::table::AnimationStep;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub propd: PropdConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub show: ShowConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub tables: TablesConfig,
}

/// Global daemon settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PropdConfig {
    /// Where the persisted settings blob lives.
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
}

impl Default for PropdConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
        }
    }
}

/// Slot count per channel.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_queue_len")]
    pub show_input: usize,
    #[serde(default = "default_queue_len")]
    pub net_send: usize,
    #[serde(default = "default_queue_len")]
    pub audio: usize,
    #[serde(default = "default_queue_len")]
    pub light: usize,
    #[serde(default = "default_queue_len")]
    pub motor: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            show_input: default_queue_len(),
            net_send: default_queue_len(),
            audio: default_queue_len(),
            light: default_queue_len(),
            motor: default_queue_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShowConfig {
    /// Scheduling period of the orchestrator.
    #[serde(default = "default_show_tick")]
    pub tick_ms: u64,

    /// Minimum time between accepted local triggers.
    #[serde(default = "default_turnaround")]
    pub turnaround_ms: u32,

    /// Start the idle loop at boot instead of waiting for `show start`.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_show_tick(),
            turnaround_ms: default_turnaround(),
            autostart: true,
        }
    }
}

/// Which range sensor feeds the detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// TOFSense-F lidar on a serial device.
    #[default]
    Tofsense,
    /// Cycle through `readings`, for bench testing.
    Scripted,
    /// No sensor fitted.
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub sensor: SensorKind,

    /// Serial device for the TOFSense sensor.
    #[serde(default = "default_sensor_device")]
    pub device: PathBuf,

    /// UART rate of the TOFSense sensor.
    #[serde(default = "default_sensor_baud")]
    pub baud: u32,

    /// Readings replayed by the scripted sensor (mm).
    #[serde(default)]
    pub readings: Vec<u32>,

    /// Sampling rate.
    #[serde(default = "default_detector_fps")]
    pub fps: u32,

    /// At or below this range a reading counts as close.
    #[serde(default = "default_close_mm")]
    pub close_mm: u32,

    /// At or above this range a reading counts as far.
    #[serde(default = "default_far_mm")]
    pub far_mm: u32,

    #[serde(default = "default_min_close")]
    pub min_close_readings: u16,

    #[serde(default = "default_min_far")]
    pub min_far_readings: u16,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensor: SensorKind::default(),
            device: default_sensor_device(),
            baud: default_sensor_baud(),
            readings: Vec::new(),
            fps: default_detector_fps(),
            close_mm: default_close_mm(),
            far_mm: default_far_mm(),
            min_close_readings: default_min_close(),
            min_far_readings: default_min_far(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_addr: default_multicast_addr(),
            port: default_port(),
            ttl: default_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    #[serde(default = "default_light_fps")]
    pub fps: u32,

    /// Length of the strip; split into two arches of equal length.
    #[serde(default = "default_num_leds")]
    pub num_leds: usize,

    /// Global brightness 0-255.
    #[serde(default = "default_led_brightness")]
    pub brightness: u8,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            fps: default_light_fps(),
            num_leds: default_num_leds(),
            brightness: default_led_brightness(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    #[serde(default = "default_motor_fps")]
    pub fps: u32,

    /// Servo slew limit in degrees per second.
    #[serde(default = "default_max_deg_per_sec")]
    pub max_deg_per_sec: f32,

    #[serde(default = "default_min_us")]
    pub min_us: u16,

    #[serde(default = "default_max_us")]
    pub max_us: u16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            fps: default_motor_fps(),
            max_deg_per_sec: default_max_deg_per_sec(),
            min_us: default_min_us(),
            max_us: default_max_us(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Serial device of the MP3 module. Without one, playback is only logged.
    #[serde(default)]
    pub device: Option<PathBuf>,

    /// The module speaks 8N1 at this rate.
    #[serde(default = "default_audio_baud")]
    pub baud: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: default_audio_baud(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Read operator commands from stdin.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_queue_len")]
    pub queue_len: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_len: default_queue_len(),
        }
    }
}

/// Show tables. Missing tables fall back to the built-in ones.
#[derive(Debug, Clone, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "crate::show::table::default_idle")]
    pub idle: Vec<AnimationStep>,
    #[serde(default = "crate::show::table::default_local")]
    pub local: Vec<AnimationStep>,
    #[serde(default = "crate::show::table::default_remote")]
    pub remote: Vec<AnimationStep>,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            idle: crate::show::table::default_idle(),
            local: crate::show::table::default_local(),
            remote: crate::show::table::default_remote(),
        }
    }
}

// --- Defaults ---

fn default_true() -> bool {
    true
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("/var/lib/propd/settings.json")
}

fn default_queue_len() -> usize {
    8
}

fn default_show_tick() -> u64 {
    10
}

fn default_turnaround() -> u32 {
    10_000
}

fn default_sensor_device() -> PathBuf {
    PathBuf::from("/dev/ttyUSB0")
}

fn default_sensor_baud() -> u32 {
    921_600
}

fn default_detector_fps() -> u32 {
    25
}

fn default_close_mm() -> u32 {
    750
}

fn default_far_mm() -> u32 {
    1000
}

fn default_min_close() -> u16 {
    2
}

fn default_min_far() -> u16 {
    10
}

fn default_multicast_addr() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 0, 1)
}

fn default_port() -> u16 {
    49400
}

fn default_ttl() -> u32 {
    1
}

fn default_audio_baud() -> u32 {
    9600
}

fn default_light_fps() -> u32 {
    60
}

fn default_num_leds() -> usize {
    300
}

fn default_led_brightness() -> u8 {
    128
}

fn default_motor_fps() -> u32 {
    50
}

fn default_max_deg_per_sec() -> f32 {
    120.0
}

fn default_min_us() -> u16 {
    600
}

fn default_max_us() -> u16 {
    2400
}
