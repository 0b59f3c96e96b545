//! Audio driver.
//!
//! Tracks what is playing and at which volume. With a serial MP3 module
//! configured every change is sent as a 10-byte command frame; without one the
//! driver only logs.

use crate::bus::BusReceiver;
use crate::config::schema::AudioConfig;
use crate::error::Result;
use crate::event::{AudioCmd, AudioMsg};
use crate::faults::{Fault, FaultRegister};
use crate::settings::MAX_VOLUME;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const FRAME_LEN: usize = 10;

const START: u8 = 0x7E;
const VERSION: u8 = 0xFF;
const LEN: u8 = 0x06;
const NO_FEEDBACK: u8 = 0x00;
const END: u8 = 0xEF;

const CMD_PLAY_TRACK: u8 = 0x03;
const CMD_SET_VOLUME: u8 = 0x06;
const CMD_STOP: u8 = 0x16;

/// Build an MP3 module command frame.
///
/// Layout: start, version, length, command, feedback, arg (BE), checksum (BE),
/// end. The checksum is the two's complement of the sum of bytes 1 through 6.
pub fn mp3_frame(command: u8, arg: u16) -> [u8; FRAME_LEN] {
    let [hi, lo] = arg.to_be_bytes();
    let mut frame = [START, VERSION, LEN, command, NO_FEEDBACK, hi, lo, 0, 0, END];
    let sum: u16 = frame[1..7].iter().map(|&b| u16::from(b)).sum();
    let [chk_hi, chk_lo] = 0u16.wrapping_sub(sum).to_be_bytes();
    frame[7] = chk_hi;
    frame[8] = chk_lo;
    frame
}

/// Playback state. Track 0 is silence.
#[derive(Debug)]
pub struct AudioPlayer {
    track: Option<u8>,
    volume: u8,
}

impl AudioPlayer {
    pub fn new(volume: u8) -> Self {
        Self {
            track: None,
            volume: volume.min(MAX_VOLUME),
        }
    }

    pub fn track(&self) -> Option<u8> {
        self.track
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn volume_frame(&self) -> [u8; FRAME_LEN] {
        mp3_frame(CMD_SET_VOLUME, u16::from(self.volume))
    }

    /// Apply a command. Returns the frame to send, if the module must change.
    pub fn handle(&mut self, msg: AudioMsg) -> Option<[u8; FRAME_LEN]> {
        match msg.cmd {
            AudioCmd::Play if msg.param == 0 => self.stop(),
            AudioCmd::Play => {
                if self.track == Some(msg.param) {
                    return None;
                }
                self.track = Some(msg.param);
                Some(mp3_frame(CMD_PLAY_TRACK, u16::from(msg.param)))
            }
            AudioCmd::Stop => {
                self.track = None;
                Some(mp3_frame(CMD_STOP, 0))
            }
            AudioCmd::Volume if msg.param > MAX_VOLUME => {
                warn!("audio volume {} out of range (0-{MAX_VOLUME})", msg.param);
                None
            }
            AudioCmd::Volume => {
                self.volume = msg.param;
                Some(self.volume_frame())
            }
            AudioCmd::None => None,
        }
    }

    fn stop(&mut self) -> Option<[u8; FRAME_LEN]> {
        self.track.take().map(|_| mp3_frame(CMD_STOP, 0))
    }
}

/// MP3 module on a serial link.
pub struct Mp3Module<W = SerialStream> {
    port: W,
}

impl Mp3Module {
    /// Open the module's serial device at `baud`, 8N1.
    ///
    /// # Errors
    /// Returns `PropError::Serial` if the device cannot be opened.
    pub fn open(path: &Path, baud: u32) -> Result<Self> {
        let port = tokio_serial::new(path.to_string_lossy(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        Ok(Self { port })
    }
}

impl<W: AsyncWrite + Unpin> Mp3Module<W> {
    pub fn new(port: W) -> Self {
        Self { port }
    }

    /// # Errors
    /// Returns `PropError::Io` if the write fails.
    pub async fn send(&mut self, frame: &[u8; FRAME_LEN]) -> Result<()> {
        self.port.write_all(frame).await?;
        self.port.flush().await?;
        Ok(())
    }
}

pub async fn run(
    config: AudioConfig,
    volume: u8,
    commands: BusReceiver<AudioMsg>,
    faults: Arc<FaultRegister>,
    cancel: CancellationToken,
) {
    let module = match &config.device {
        Some(path) => match Mp3Module::open(path, config.baud) {
            Ok(m) => {
                info!("MP3 module opened on {} at {} baud", path.display(), config.baud);
                Some(m)
            }
            Err(e) => {
                warn!("audio device {} offline: {e}", path.display());
                faults.set(Fault::AudioDeviceInit);
                None
            }
        },
        None => {
            info!("no audio device configured, playback is logged only");
            None
        }
    };

    serve(AudioPlayer::new(volume), module, commands, cancel).await;
}

/// Apply commands until cancelled or the bus closes, writing frames to
/// `module` when there is one.
pub async fn serve<W: AsyncWrite + Unpin>(
    mut player: AudioPlayer,
    mut module: Option<Mp3Module<W>>,
    mut commands: BusReceiver<AudioMsg>,
    cancel: CancellationToken,
) {
    if let Some(m) = module.as_mut() {
        if let Err(e) = m.send(&player.volume_frame()).await {
            warn!("MP3 module write failed: {e}");
        }
    }
    info!("audio task started, volume {}", player.volume());

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = commands.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        debug!("audio {:?} {}", msg.cmd, msg.param);
        let Some(frame) = player.handle(msg) else {
            continue;
        };
        if let Some(m) = module.as_mut() {
            if let Err(e) = m.send(&frame).await {
                warn!("MP3 module write failed: {e}");
            }
        }
    }

    info!("audio task shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::config::schema::BusConfig;
    use std::path::PathBuf;
    use tokio::io::AsyncReadExt;

    #[test]
    fn frame_checksum() {
        assert_eq!(
            mp3_frame(CMD_SET_VOLUME, 30),
            [0x7E, 0xFF, 0x06, 0x06, 0x00, 0x00, 0x1E, 0xFE, 0xD7, 0xEF]
        );
        assert_eq!(
            mp3_frame(CMD_PLAY_TRACK, 1),
            [0x7E, 0xFF, 0x06, 0x03, 0x00, 0x00, 0x01, 0xFE, 0xF7, 0xEF]
        );
    }

    #[test]
    fn player_state() {
        let mut p = AudioPlayer::new(20);
        assert!(p.handle(AudioMsg::new(AudioCmd::Play, 0)).is_none());

        assert!(p.handle(AudioMsg::new(AudioCmd::Play, 3)).is_some());
        assert!(p.handle(AudioMsg::new(AudioCmd::Play, 3)).is_none());
        assert_eq!(p.track(), Some(3));

        assert_eq!(
            p.handle(AudioMsg::new(AudioCmd::Play, 0)),
            Some(mp3_frame(CMD_STOP, 0))
        );
        assert_eq!(p.track(), None);

        assert!(p.handle(AudioMsg::new(AudioCmd::Volume, 31)).is_none());
        assert_eq!(p.volume(), 20);
        assert!(p.handle(AudioMsg::new(AudioCmd::Volume, 5)).is_some());
        assert_eq!(p.volume(), 5);
    }

    #[tokio::test]
    async fn frames_reach_the_device() {
        let (mut device, port) = tokio::io::duplex(256);
        let (bus, ends) = bus::create(&BusConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(
            AudioPlayer::new(10),
            Some(Mp3Module::new(port)),
            ends.audio,
            cancel,
        ));

        bus.audio
            .try_publish(AudioMsg::new(AudioCmd::Play, 2))
            .unwrap();
        drop(bus);
        task.await.unwrap();

        let mut written = Vec::new();
        device.read_to_end(&mut written).await.unwrap();
        assert_eq!(written.len(), 2 * FRAME_LEN);
        assert_eq!(written[..FRAME_LEN], mp3_frame(CMD_SET_VOLUME, 10));
        assert_eq!(written[FRAME_LEN..], mp3_frame(CMD_PLAY_TRACK, 2));
    }

    #[tokio::test]
    async fn missing_device_sets_fault_and_drains() {
        let (bus, ends) = bus::create(&BusConfig::default()).unwrap();
        let faults = Arc::new(FaultRegister::new());
        let config = AudioConfig {
            device: Some(PathBuf::from("/nonexistent/propd/mp3")),
            ..AudioConfig::default()
        };
        let task = tokio::spawn(run(
            config,
            10,
            ends.audio,
            faults.clone(),
            CancellationToken::new(),
        ));

        for track in 1..=4 {
            bus.audio.publish(AudioMsg::new(AudioCmd::Play, track));
        }
        drop(bus);
        task.await.unwrap();
        assert!(faults.is_active(Fault::AudioDeviceInit));
    }
}
