//! Range sensor backends.

use crate::config::schema::{DetectorConfig, SensorKind};
use crate::error::{PropError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info, trace};

/// How long a read waits for more bytes before the sample is closed.
const READ_WAIT: Duration = Duration::from_millis(2);

pub const FRAME_LEN: usize = 16;
pub const FRAME_HEADER: u8 = 0x57;
pub const FUNCTION_MARK: u8 = 0x00;

/// One decoded TOFSense measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub id: u8,
    pub system_time_ms: u32,
    pub distance_mm: u32,
    pub status: u8,
    pub signal_strength: u16,
}

/// Incremental decoder for the NLINK TOFSense-F output frame.
///
/// Byte layout: header, function mark, reserved, id, system time (4, LE),
/// distance (3, LE, mm), status, signal strength (2, LE), precision, checksum.
/// The checksum is the low byte of the sum of the first 15 bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// Feed one byte; returns a measurement when a valid frame completes.
    pub fn push(&mut self, byte: u8) -> Option<Measurement> {
        if self.buf.is_empty() && byte != FRAME_HEADER {
            return None;
        }
        self.buf.push(byte);
        if self.buf.len() < FRAME_LEN {
            return None;
        }

        let frame: [u8; FRAME_LEN] = self.buf[..FRAME_LEN].try_into().ok()?;
        self.buf.clear();
        let decoded = decode(&frame);
        if decoded.is_none() {
            trace!("dropping bad TOFSense frame {frame:02X?}");
        }
        decoded
    }
}

fn decode(frame: &[u8; FRAME_LEN]) -> Option<Measurement> {
    let sum = frame[..FRAME_LEN - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    if frame[0] != FRAME_HEADER || frame[1] != FUNCTION_MARK || sum != frame[FRAME_LEN - 1] {
        return None;
    }

    Some(Measurement {
        id: frame[3],
        system_time_ms: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
        distance_mm: u32::from_le_bytes([frame[8], frame[9], frame[10], 0]),
        status: frame[11],
        signal_strength: u16::from_le_bytes([frame[12], frame[13]]),
    })
}

/// TOFSense-F lidar streaming frames over a serial device.
pub struct TofSense {
    path: PathBuf,
    baud: u32,
    port: Option<Box<dyn AsyncRead + Unpin + Send>>,
    decoder: FrameDecoder,
}

impl TofSense {
    pub fn new(path: PathBuf, baud: u32) -> Self {
        Self {
            path,
            baud,
            port: None,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read frames from an already open stream instead of the serial device.
    pub fn with_port<R>(port: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            path: PathBuf::new(),
            baud: 0,
            port: Some(Box::new(port)),
            decoder: FrameDecoder::new(),
        }
    }

    async fn init(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = tokio_serial::new(self.path.to_string_lossy(), self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| PropError::Sensor(format!("{}: {e}", self.path.display())))?;
        self.port = Some(Box::new(port));
        info!("TOFSense sensor opened on {} at {} baud", self.path.display(), self.baud);
        Ok(())
    }

    /// Ranges of every frame completed since the previous call, oldest first.
    async fn read_samples(&mut self) -> Vec<u32> {
        let mut samples = Vec::new();
        let Some(port) = self.port.as_mut() else {
            return samples;
        };
        let mut chunk = [0u8; 64];
        loop {
            match tokio::time::timeout(READ_WAIT, port.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => {
                    samples.extend(
                        chunk[..n]
                            .iter()
                            .filter_map(|&b| self.decoder.push(b))
                            .map(|m| m.distance_mm),
                    );
                }
                Ok(Ok(_)) => break,
                Ok(Err(e)) => {
                    debug!("TOFSense read error: {e}");
                    break;
                }
                Err(_) => break,
            }
        }
        samples
    }
}

/// Replays configured readings in a loop.
pub struct Scripted {
    readings: Vec<u32>,
    next: usize,
}

impl Scripted {
    pub fn new(readings: Vec<u32>) -> Self {
        Self { readings, next: 0 }
    }

    fn read_samples(&mut self) -> Vec<u32> {
        let Some(&reading) = self.readings.get(self.next) else {
            return Vec::new();
        };
        self.next = (self.next + 1) % self.readings.len();
        vec![reading]
    }
}

pub enum Sensor {
    TofSense(TofSense),
    Scripted(Scripted),
    Absent,
}

impl Sensor {
    pub fn from_config(config: &DetectorConfig) -> Self {
        match config.sensor {
            SensorKind::Tofsense => {
                Self::TofSense(TofSense::new(config.device.clone(), config.baud))
            }
            SensorKind::Scripted => Self::Scripted(Scripted::new(config.readings.clone())),
            SensorKind::None => Self::Absent,
        }
    }

    /// # Errors
    /// Returns `PropError::Sensor` if the sensor is missing or cannot be opened.
    pub async fn init(&mut self) -> Result<()> {
        match self {
            Self::TofSense(s) => s.init().await,
            Self::Scripted(s) if s.readings.is_empty() => {
                Err(PropError::Sensor("no scripted readings".to_string()))
            }
            Self::Scripted(_) => Ok(()),
            Self::Absent => Err(PropError::Sensor("no sensor configured".to_string())),
        }
    }

    /// Ranges in millimetres measured since the previous call. Empty when
    /// no new frame arrived.
    pub async fn read_samples(&mut self) -> Vec<u32> {
        match self {
            Self::TofSense(s) => s.read_samples().await,
            Self::Scripted(s) => s.read_samples(),
            Self::Absent => Vec::new(),
        }
    }
}
