//! Bounded, copy-by-value channels connecting the tasks.
//!
//! Each channel has exactly one consuming task and any number of producers.
//! Real-time producers never wait on a full channel: the message is dropped
//! and the drop is logged.

use crate::config::schema::BusConfig;
use crate::error::{PropError, Result};
use crate::event::{AudioMsg, LightMsg, MotorMsg, NetSend, ShowInput};
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

/// Producer half of a named channel.
#[derive(Debug)]
pub struct BusSender<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T: Copy + Debug> BusSender<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Zero-timeout send.
    ///
    /// # Errors
    /// Returns `PropError::QueueFull` if no slot is free, or
    /// `PropError::QueueClosed` if the consumer is gone.
    pub fn try_publish(&self, msg: T) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => PropError::QueueFull(self.name),
            TrySendError::Closed(_) => PropError::QueueClosed(self.name),
        })
    }

    /// Best-effort send: drop and log on failure. Returns whether the message was queued.
    pub fn publish(&self, msg: T) -> bool {
        match self.try_publish(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropped {msg:?}: {e}");
                false
            }
        }
    }

    /// Wait up to `timeout` for a free slot.
    ///
    /// # Errors
    /// Returns `PropError::QueueFull` if the timeout elapses first.
    pub async fn publish_timeout(&self, msg: T, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return self.try_publish(msg);
        }
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PropError::QueueClosed(self.name)),
            Err(_) => Err(PropError::QueueFull(self.name)),
        }
    }
}

/// Consumer half of a named channel. Owned by exactly one task.
#[derive(Debug)]
pub struct BusReceiver<T> {
    name: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> BusReceiver<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the oldest pending message without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next message. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Everything pending right now, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_recv())
    }
}

fn channel<T>(name: &'static str, capacity: usize) -> Result<(BusSender<T>, BusReceiver<T>)> {
    if capacity == 0 {
        return Err(PropError::Bus(format!("channel '{name}' needs capacity > 0")));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((BusSender { name, tx }, BusReceiver { name, rx }))
}

/// Producer handles for every channel. Cheap to clone into each task.
#[derive(Debug, Clone)]
pub struct Bus {
    pub show: BusSender<ShowInput>,
    pub net: BusSender<NetSend>,
    pub audio: BusSender<AudioMsg>,
    pub light: BusSender<LightMsg>,
    pub motor: BusSender<MotorMsg>,
}

/// Consumer handles, handed out once to the owning tasks at startup.
#[derive(Debug)]
pub struct BusEndpoints {
    pub show: BusReceiver<ShowInput>,
    pub net: BusReceiver<NetSend>,
    pub audio: BusReceiver<AudioMsg>,
    pub light: BusReceiver<LightMsg>,
    pub motor: BusReceiver<MotorMsg>,
}

/// Create all channels.
///
/// # Errors
/// Returns `PropError::Bus` if any channel cannot be created. Nothing can run
/// without the bus, so callers treat this as fatal.
pub fn create(config: &BusConfig) -> Result<(Bus, BusEndpoints)> {
    let (show_tx, show_rx) = channel("show-input", config.show_input)?;
    let (net_tx, net_rx) = channel("net-send", config.net_send)?;
    let (audio_tx, audio_rx) = channel("audio-cmd", config.audio)?;
    let (light_tx, light_rx) = channel("light-cmd", config.light)?;
    let (motor_tx, motor_rx) = channel("motor-cmd", config.motor)?;

    Ok((
        Bus {
            show: show_tx,
            net: net_tx,
            audio: audio_tx,
            light: light_tx,
            motor: motor_tx,
        },
        BusEndpoints {
            show: show_rx,
            net: net_rx,
            audio: audio_rx,
            light: light_rx,
            motor: motor_rx,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LightCmd, ShowCmd};

    fn small_bus(capacity: usize) -> (Bus, BusEndpoints) {
        create(&BusConfig {
            show_input: capacity,
            net_send: capacity,
            audio: capacity,
            light: capacity,
            motor: capacity,
        })
        .unwrap()
    }

    #[test]
    fn fifo_within_channel() {
        let (bus, mut ends) = small_bus(8);
        for i in 0..8 {
            assert!(bus.light.publish(LightMsg::new(LightCmd::Play, i)));
        }
        let got: Vec<u8> = ends.light.drain().map(|m| m.param).collect();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
        assert!(ends.light.try_recv().is_none());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (bus, mut ends) = small_bus(2);
        assert!(bus.show.publish(ShowInput::new(ShowCmd::Start, 0)));
        assert!(bus.show.publish(ShowInput::new(ShowCmd::TriggerLocal, 1)));
        assert!(matches!(
            bus.show.try_publish(ShowInput::new(ShowCmd::Stop, 2)),
            Err(PropError::QueueFull("show-input"))
        ));

        let got: Vec<_> = ends.show.drain().collect();
        assert_eq!(
            got,
            vec![
                ShowInput::new(ShowCmd::Start, 0),
                ShowInput::new(ShowCmd::TriggerLocal, 1)
            ]
        );
    }

    #[test]
    fn zero_capacity_is_fatal() {
        let err = create(&BusConfig {
            show_input: 8,
            net_send: 0,
            audio: 8,
            light: 8,
            motor: 8,
        })
        .unwrap_err();
        assert!(matches!(err, PropError::Bus(_)));
    }

    #[tokio::test]
    async fn publish_timeout_waits_for_a_slot() {
        let (bus, mut ends) = small_bus(1);
        bus.light.try_publish(LightMsg::new(LightCmd::Play, 1)).unwrap();

        let err = bus
            .light
            .publish_timeout(LightMsg::new(LightCmd::Stop, 0), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PropError::QueueFull(_)));

        assert_eq!(ends.light.try_recv().map(|m| m.param), Some(1));
        bus.light
            .publish_timeout(LightMsg::new(LightCmd::Stop, 0), Duration::from_millis(20))
            .await
            .unwrap();
        let msg = ends
            .light
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(msg.cmd, LightCmd::Stop);
    }

    #[tokio::test]
    async fn recv_timeout_on_empty_channel() {
        let (_bus, mut ends) = small_bus(4);
        assert!(ends
            .audio
            .recv_timeout(Duration::from_millis(5))
            .await
            .is_none());
    }
}
