//! Fixed-size records carried by the message bus.
//!
//! Every record is plain `Copy` data. Sizes are checked at compile time so a
//! record always fits its two (or three) byte slot.

use std::mem::size_of;

macro_rules! command_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(value: u8) -> std::result::Result<Self, u8> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

pub(crate) use command_enum;

command_enum! {
    /// Inputs accepted by the show orchestrator.
    pub enum ShowCmd {
        None = 0,
        Start = 1,
        Stop = 2,
        TriggerLocal = 3,
        TriggerPeer = 4,
    }
}

command_enum! {
    /// Commands accepted by the audio driver.
    pub enum AudioCmd {
        None = 0,
        Play = 1,
        Stop = 2,
        Volume = 3,
    }
}

command_enum! {
    /// Commands accepted by the light driver.
    pub enum LightCmd {
        None = 0,
        Play = 1,
        Stop = 2,
    }
}

command_enum! {
    /// Commands accepted by the motor driver.
    pub enum MotorCmd {
        None = 0,
        Play = 1,
        Stop = 2,
        Home = 3,
    }
}

/// A two-byte `{command, parameter}` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Msg<C> {
    pub cmd: C,
    pub param: u8,
}

impl<C: Copy + Into<u8> + TryFrom<u8, Error = u8>> Msg<C> {
    pub const fn new(cmd: C, param: u8) -> Self {
        Self { cmd, param }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.cmd.into(), self.param]
    }

    /// Rebuild a record from its slot bytes. Unknown command bytes are rejected.
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        C::try_from(bytes[0]).ok().map(|cmd| Self { cmd, param: bytes[1] })
    }
}

pub type ShowInput = Msg<ShowCmd>;
pub type AudioMsg = Msg<AudioCmd>;
pub type LightMsg = Msg<LightCmd>;
pub type MotorMsg = Msg<MotorCmd>;

macro_rules! into_u8 {
    ($($name:ident),+) => {
        $(impl From<$name> for u8 {
            fn from(cmd: $name) -> u8 {
                cmd as u8
            }
        })+
    };
}

pub(crate) use into_u8;

into_u8!(ShowCmd, AudioCmd, LightCmd, MotorCmd);

/// A three-byte request for the network task: `{destination, command, parameter}`.
///
/// `cmd` is a peer protocol command code; the network task stamps the source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct NetSend {
    pub dest: u8,
    pub cmd: u8,
    pub param: u8,
}

impl NetSend {
    pub fn to_bytes(self) -> [u8; 3] {
        [self.dest, self.cmd, self.param]
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            dest: bytes[0],
            cmd: bytes[1],
            param: bytes[2],
        }
    }
}

const _: () = assert!(size_of::<ShowInput>() == 2);
const _: () = assert!(size_of::<AudioMsg>() == 2);
const _: () = assert!(size_of::<LightMsg>() == 2);
const _: () = assert!(size_of::<MotorMsg>() == 2);
const _: () = assert!(size_of::<NetSend>() == 3);
