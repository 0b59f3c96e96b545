//! Subsystem drivers.
//!
//! Each driver owns one bus channel and applies its commands in order. Light
//! and motor render at a fixed frame rate; audio is event driven.

pub mod audio;
pub mod light;
pub mod motor;

use crate::error::{PropError, Result};
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// A closed set of animations addressed by a one-byte index.
pub trait Animation: Copy + Debug + PartialEq + TryFrom<u8, Error = u8> + Into<u8> {
    /// Subsystem name used in errors and logs.
    const NAME: &'static str;
    /// Number of valid indices, starting at 0.
    const COUNT: u8;
}

/// Play/stop bookkeeping shared by the frame-based drivers.
#[derive(Debug)]
pub struct Playback<A> {
    current: Option<A>,
    reset: bool,
}

impl<A: Animation> Default for Playback<A> {
    fn default() -> Self {
        Self {
            current: None,
            reset: true,
        }
    }
}

impl<A: Animation> Playback<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start animation `index`. Replaying the animation already running is a
    /// no-op; anything else restarts from the animation's initial state.
    /// Returns whether a restart happened.
    ///
    /// # Errors
    /// Returns `PropError::InvalidIndex` if `index` names no animation; the
    /// current animation keeps running.
    pub fn play(&mut self, index: u8) -> Result<bool> {
        let anim = A::try_from(index).map_err(|index| PropError::InvalidIndex {
            subsystem: A::NAME,
            index,
        })?;
        if self.current == Some(anim) {
            return Ok(false);
        }
        debug!("{} playing {anim:?}", A::NAME);
        self.current = Some(anim);
        self.reset = true;
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.current = None;
        self.reset = true;
    }

    pub fn current(&self) -> Option<A> {
        self.current
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// The animation to render this frame, and whether it must start over.
    pub fn next_frame(&mut self) -> Option<(A, bool)> {
        let anim = self.current?;
        let reset = std::mem::replace(&mut self.reset, false);
        Some((anim, reset))
    }
}

/// Frame clock for a driver running at `fps`.
pub(crate) fn frame_interval(fps: u32) -> Interval {
    let period = Duration::from_micros(1_000_000 / u64::from(fps.max(1)));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
