//! Operator command dispatch.
//!
//! A `CommandLine` is parsed into a typed `Command`, then executed against the
//! bus and the shared stores. Every command produces a textual reply; bad
//! arguments are answered with usage text and publish nothing.

pub mod peer;

use crate::bus::{Bus, BusSender};
use crate::detector::ProximityStatus;
use crate::event::{
    AudioCmd, AudioMsg, LightCmd, LightMsg, MotorCmd, MotorMsg, NetSend, ShowCmd, ShowInput,
};
use crate::faults::FaultRegister;
use crate::net::protocol::{Command as NetCommand, BROADCAST};
use crate::net::NetStatus;
use crate::settings::SettingsStore;
use std::fmt::{Debug, Write as _};
use std::sync::Arc;
use tracing::debug;

/// One tokenized console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub cmd: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Faults,
    CfgShow,
    CfgLoad,
    CfgSave,
    CfgDefaults,
    CfgSetId(u8),
    CfgSetSsid(String),
    CfgSetPass(String),
    CfgSetVolume(u8),
    NetShow,
    NetPing,
    ProxShow,
    Mode(bool),
    Show(ShowInput),
    Audio(AudioMsg),
    Light(LightMsg),
    Motor(MotorMsg),
}

const HELP: &str = "\
 help               This list of commands.
 faults             List active faults.
 cfg show           Show stored settings.
 cfg set id <n>     Set device id (0-254).
 cfg set ssid <s>   Set WiFi SSID.
 cfg set pass <s>   Set WiFi password.
 cfg set volume <n> Set default audio volume (0-30).
 cfg load           Reload settings from storage.
 cfg save           Save settings to storage.
 cfg defaults       Load default settings (not saved).
 net show           Show network status.
 net ping           Ping all peers.
 prox show          Show the latest proximity reading.
 mode on|off        Start or stop the show here and on all peers.
 show start         Start the show.
 show stop          Stop the show.
 show triglocal [n] Trigger the local table.
 show trigpeer <n>  Trigger the remote table.
 audio play <n>     Play audio track n.
 audio stop         Stop audio.
 audio volume <n>   Set audio volume (0-30).
 light play <n>     Play light animation n.
 light stop         Stop lights.
 motor play <n>     Play motor animation n.
 motor stop         Stop the motor.
 motor home         Home the motor.";

fn byte_arg(line: &CommandLine, index: usize, what: &str) -> Result<u8, String> {
    let raw = line
        .arg(index)
        .ok_or_else(|| format!("missing {what}"))?;
    raw.parse::<u8>()
        .map_err(|_| format!("invalid {what} '{raw}', expected 0-255"))
}

fn eq(a: Option<&str>, b: &str) -> bool {
    a.is_some_and(|a| a.eq_ignore_ascii_case(b))
}

impl Command {
    /// # Errors
    /// Returns the reply to print when the line is not a valid command.
    pub fn parse(line: &CommandLine) -> Result<Self, String> {
        let verb = line.arg(0);
        match line.cmd.to_ascii_lowercase().as_str() {
            "help" => Ok(Self::Help),
            "faults" => Ok(Self::Faults),
            "cfg" => Self::parse_cfg(line),
            "net" if eq(verb, "show") => Ok(Self::NetShow),
            "net" if eq(verb, "ping") => Ok(Self::NetPing),
            "net" => Err("usage: net show|ping".to_string()),
            "prox" if eq(verb, "show") => Ok(Self::ProxShow),
            "prox" => Err("usage: prox show".to_string()),
            "mode" if eq(verb, "on") => Ok(Self::Mode(true)),
            "mode" if eq(verb, "off") => Ok(Self::Mode(false)),
            "mode" => Err("usage: mode on|off".to_string()),
            "show" => Self::parse_show(line).map(Self::Show),
            "audio" => Self::parse_audio(line).map(Self::Audio),
            "light" => Self::parse_light(line).map(Self::Light),
            "motor" => Self::parse_motor(line).map(Self::Motor),
            _ => Err(format!("unknown command '{}', try 'help'", line.cmd)),
        }
    }

    fn parse_cfg(line: &CommandLine) -> Result<Self, String> {
        const USAGE: &str = "usage: cfg show|load|save|defaults|set <id|ssid|pass|volume> <value>";
        let verb = line.arg(0);
        if eq(verb, "show") {
            return Ok(Self::CfgShow);
        }
        if eq(verb, "load") {
            return Ok(Self::CfgLoad);
        }
        if eq(verb, "save") {
            return Ok(Self::CfgSave);
        }
        if eq(verb, "defaults") {
            return Ok(Self::CfgDefaults);
        }
        if !eq(verb, "set") {
            return Err(USAGE.to_string());
        }

        let field = line.arg(1);
        let value = line.arg(2).ok_or_else(|| USAGE.to_string())?;
        if eq(field, "id") {
            byte_arg(line, 2, "device id").map(Self::CfgSetId)
        } else if eq(field, "ssid") {
            Ok(Self::CfgSetSsid(value.to_string()))
        } else if eq(field, "pass") {
            Ok(Self::CfgSetPass(value.to_string()))
        } else if eq(field, "volume") {
            byte_arg(line, 2, "volume").map(Self::CfgSetVolume)
        } else {
            Err(format!("unsupported setting '{}'", field.unwrap_or_default()))
        }
    }

    fn parse_show(line: &CommandLine) -> Result<ShowInput, String> {
        const USAGE: &str = "usage: show start|stop|triglocal [n]|trigpeer <n>";
        let verb = line.arg(0);
        if eq(verb, "start") {
            Ok(ShowInput::new(ShowCmd::Start, 0))
        } else if eq(verb, "stop") {
            Ok(ShowInput::new(ShowCmd::Stop, 0))
        } else if eq(verb, "triglocal") {
            // Same input the detector raises when no index is given.
            let index = match line.arg(1) {
                Some(_) => byte_arg(line, 1, "trigger index")?,
                None => 0,
            };
            Ok(ShowInput::new(ShowCmd::TriggerLocal, index))
        } else if eq(verb, "trigpeer") {
            byte_arg(line, 1, "trigger index").map(|n| ShowInput::new(ShowCmd::TriggerPeer, n))
        } else {
            Err(USAGE.to_string())
        }
    }

    fn parse_audio(line: &CommandLine) -> Result<AudioMsg, String> {
        let verb = line.arg(0);
        if eq(verb, "play") {
            byte_arg(line, 1, "track").map(|n| AudioMsg::new(AudioCmd::Play, n))
        } else if eq(verb, "stop") {
            Ok(AudioMsg::new(AudioCmd::Stop, 0))
        } else if eq(verb, "volume") {
            byte_arg(line, 1, "volume").map(|n| AudioMsg::new(AudioCmd::Volume, n))
        } else {
            Err("usage: audio play <n>|stop|volume <n>".to_string())
        }
    }

    fn parse_light(line: &CommandLine) -> Result<LightMsg, String> {
        let verb = line.arg(0);
        if eq(verb, "play") {
            byte_arg(line, 1, "animation").map(|n| LightMsg::new(LightCmd::Play, n))
        } else if eq(verb, "stop") {
            Ok(LightMsg::new(LightCmd::Stop, 0))
        } else {
            Err("usage: light play <n>|stop".to_string())
        }
    }

    fn parse_motor(line: &CommandLine) -> Result<MotorMsg, String> {
        let verb = line.arg(0);
        if eq(verb, "play") {
            byte_arg(line, 1, "animation").map(|n| MotorMsg::new(MotorCmd::Play, n))
        } else if eq(verb, "stop") {
            Ok(MotorMsg::new(MotorCmd::Stop, 0))
        } else if eq(verb, "home") {
            Ok(MotorMsg::new(MotorCmd::Home, 0))
        } else {
            Err("usage: motor play <n>|stop|home".to_string())
        }
    }
}

/// Shared handles the dispatcher acts on.
pub struct Dispatcher {
    pub bus: Bus,
    pub settings: Arc<SettingsStore>,
    pub faults: Arc<FaultRegister>,
    pub net: Arc<NetStatus>,
    pub prox: Arc<ProximityStatus>,
}

fn queued<T: Copy + Debug>(tx: &BusSender<T>, msg: T, what: &str) -> String {
    if tx.publish(msg) {
        format!("Queued {what}")
    } else {
        format!("{} queue full, {what} dropped", tx.name())
    }
}

impl Dispatcher {
    /// Parse and run one line, returning the operator reply.
    pub fn dispatch(&self, line: &CommandLine) -> String {
        debug!("console: {} {:?}", line.cmd, line.args);
        match Command::parse(line) {
            Ok(cmd) => self.execute(cmd),
            Err(reply) => reply,
        }
    }

    pub fn execute(&self, cmd: Command) -> String {
        match cmd {
            Command::Help => HELP.to_string(),
            Command::Faults => format!("Active faults:\n{}", self.faults.report()),

            Command::CfgShow => self.cfg_show(),
            Command::CfgLoad => match self.settings.load() {
                Ok(()) => "Settings loaded".to_string(),
                Err(e) => format!("Failed to load settings: {e}"),
            },
            Command::CfgSave => match self.settings.save() {
                Ok(()) => format!("Settings saved to {}", self.settings.path().display()),
                Err(e) => format!("Failed to save settings: {e}"),
            },
            Command::CfgDefaults => {
                self.settings.set_defaults();
                "Default settings loaded, not saved".to_string()
            }
            Command::CfgSetId(id) => reply(self.settings.set_device_id(id), || {
                format!("Device id set to {id}")
            }),
            Command::CfgSetSsid(ssid) => {
                let text = format!("WiFi SSID set to {ssid}");
                reply(self.settings.set_ssid(&ssid), || text)
            }
            Command::CfgSetPass(pass) => {
                reply(self.settings.set_password(&pass), || "WiFi password set".to_string())
            }
            Command::CfgSetVolume(volume) => match self.settings.set_volume(volume) {
                Ok(()) => {
                    self.bus.audio.publish(AudioMsg::new(AudioCmd::Volume, volume));
                    format!("Default volume set to {volume}")
                }
                Err(e) => e.to_string(),
            },

            Command::NetShow => self.net_show(),
            Command::NetPing => queued(
                &self.bus.net,
                NetSend {
                    dest: BROADCAST,
                    cmd: NetCommand::Ping.into(),
                    param: 0,
                },
                "ping",
            ),
            Command::ProxShow => format!(
                "Proximity:\n range: {} mm\n zone: {:?}",
                self.prox.range_mm(),
                self.prox.zone()
            ),
            Command::Mode(on) => {
                let (cmd, mode) = if on {
                    (ShowCmd::Start, peer::MODE_ON)
                } else {
                    (ShowCmd::Stop, peer::MODE_OFF)
                };
                let local = queued(&self.bus.show, ShowInput::new(cmd, 0), "show mode");
                let remote = queued(
                    &self.bus.net,
                    NetSend {
                        dest: BROADCAST,
                        cmd: NetCommand::ChangeMode.into(),
                        param: mode,
                    },
                    "peer mode change",
                );
                format!("{local}\n{remote}")
            }

            Command::Show(msg) => {
                queued(&self.bus.show, msg, &format!("show {:?} {}", msg.cmd, msg.param))
            }
            Command::Audio(msg) => {
                queued(&self.bus.audio, msg, &format!("audio {:?} {}", msg.cmd, msg.param))
            }
            Command::Light(msg) => {
                queued(&self.bus.light, msg, &format!("light {:?} {}", msg.cmd, msg.param))
            }
            Command::Motor(msg) => {
                queued(&self.bus.motor, msg, &format!("motor {:?} {}", msg.cmd, msg.param))
            }
        }
    }

    fn cfg_show(&self) -> String {
        let s = self.settings.snapshot();
        let mut out = String::from("Settings:\n");
        let _ = writeln!(out, " device id: {}", s.device_id);
        let _ = writeln!(out, " WiFi SSID: >{}< len {}", s.ssid, s.ssid.len());
        let _ = writeln!(out, " WiFi pass: {} chars", s.password.len());
        let _ = write!(out, " volume: {}", s.volume);
        out
    }

    fn net_show(&self) -> String {
        let mut out = String::from("Network:\n");
        let state = if self.net.is_listening() { "LISTENING" } else { "IDLE" };
        let _ = writeln!(out, " multicast: {} ({state})", self.net.group());
        let _ = writeln!(out, " device id: {}", self.settings.device_id());
        let _ = writeln!(out, " rx frames: {}", self.net.rx_frames());
        let _ = writeln!(out, " tx frames: {}", self.net.tx_frames());
        match self.net.last_src() {
            Some(src) => {
                let _ = write!(out, " last peer: 0x{src:02X}");
            }
            None => out.push_str(" last peer: none"),
        }
        out
    }
}

fn reply(result: crate::error::Result<()>, ok: impl FnOnce() -> String) -> String {
    match result {
        Ok(()) => ok(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{self, BusEndpoints};
    use crate::config::schema::{BusConfig, NetworkConfig};

    fn line(text: &str) -> CommandLine {
        let mut parts = text.split_whitespace().map(str::to_string);
        CommandLine {
            cmd: parts.next().unwrap_or_default(),
            args: parts.collect(),
        }
    }

    fn dispatcher(name: &str) -> (Dispatcher, BusEndpoints) {
        let (bus, ends) = bus::create(&BusConfig::default()).unwrap();
        let path = std::env::temp_dir()
            .join(format!("propd-dispatch-{}-{name}", std::process::id()))
            .join("settings.json");
        let d = Dispatcher {
            bus,
            settings: Arc::new(SettingsStore::new(path)),
            faults: Arc::new(FaultRegister::new()),
            net: Arc::new(NetStatus::new(&NetworkConfig::default())),
            prox: Arc::new(ProximityStatus::default()),
        };
        (d, ends)
    }

    #[test]
    fn core_verbs_publish_one_message() {
        let (d, mut ends) = dispatcher("verbs");
        d.dispatch(&line("show triglocal 2"));
        d.dispatch(&line("show triglocal"));
        d.dispatch(&line("SHOW Start"));
        d.dispatch(&line("audio volume 12"));
        d.dispatch(&line("light play 4"));
        d.dispatch(&line("motor home"));

        assert_eq!(
            ends.show.drain().collect::<Vec<_>>(),
            vec![
                ShowInput::new(ShowCmd::TriggerLocal, 2),
                ShowInput::new(ShowCmd::TriggerLocal, 0),
                ShowInput::new(ShowCmd::Start, 0)
            ]
        );
        assert_eq!(ends.audio.try_recv(), Some(AudioMsg::new(AudioCmd::Volume, 12)));
        assert_eq!(ends.light.try_recv(), Some(LightMsg::new(LightCmd::Play, 4)));
        assert_eq!(ends.motor.try_recv(), Some(MotorMsg::new(MotorCmd::Home, 0)));
    }

    #[test]
    fn bad_numbers_publish_nothing() {
        let (d, mut ends) = dispatcher("bad");
        for text in [
            "light play x",
            "light play 256",
            "audio play",
            "show trigpeer -1",
            "show triglocal x",
        ] {
            let reply = d.dispatch(&line(text));
            assert!(!reply.starts_with("Queued"), "{text}: {reply}");
        }
        assert!(ends.light.try_recv().is_none());
        assert!(ends.audio.try_recv().is_none());
        assert!(ends.show.try_recv().is_none());
    }

    #[test]
    fn usage_and_unknown() {
        let (d, _ends) = dispatcher("usage");
        assert!(d.dispatch(&line("motor spin")).starts_with("usage: motor"));
        assert!(d.dispatch(&line("dance")).contains("unknown command 'dance'"));
        assert!(d.dispatch(&line("help")).contains("show triglocal"));
    }

    #[test]
    fn full_queue_is_reported() {
        let (d, _ends) = dispatcher("full");
        for _ in 0..8 {
            assert!(d.dispatch(&line("light stop")).starts_with("Queued"));
        }
        assert!(d.dispatch(&line("light stop")).contains("queue full"));
    }

    #[test]
    fn mode_broadcasts_to_peers() {
        let (d, mut ends) = dispatcher("mode");
        d.dispatch(&line("mode off"));
        assert_eq!(ends.show.try_recv(), Some(ShowInput::new(ShowCmd::Stop, 0)));
        assert_eq!(
            ends.net.try_recv(),
            Some(NetSend {
                dest: BROADCAST,
                cmd: NetCommand::ChangeMode.into(),
                param: peer::MODE_OFF
            })
        );
    }

    #[test]
    fn cfg_commands() {
        let (d, mut ends) = dispatcher("cfg");
        assert_eq!(d.dispatch(&line("cfg set id 7")), "Device id set to 7");
        assert!(d.dispatch(&line("cfg set id 255")).contains("out of range"));
        assert!(d.dispatch(&line("cfg set id abc")).contains("invalid device id"));
        assert_eq!(d.settings.device_id(), 7);

        assert_eq!(d.dispatch(&line("cfg set volume 25")), "Default volume set to 25");
        assert_eq!(ends.audio.try_recv(), Some(AudioMsg::new(AudioCmd::Volume, 25)));

        d.dispatch(&line("cfg set ssid propnet"));
        assert!(d.dispatch(&line("cfg show")).contains(">propnet<"));
        assert!(d.dispatch(&line("cfg save")).starts_with("Settings saved"));

        d.dispatch(&line("cfg defaults"));
        assert_eq!(d.settings.device_id(), 0);
        assert_eq!(d.dispatch(&line("cfg load")), "Settings loaded");
        assert_eq!(d.settings.device_id(), 7);
    }

    #[test]
    fn status_reports() {
        let (d, _ends) = dispatcher("status");
        assert_eq!(d.dispatch(&line("faults")), "Active faults:\nNone");
        assert!(d.dispatch(&line("net show")).contains("239.255.0.1:49400 (IDLE)"));
        assert!(d.dispatch(&line("prox show")).contains("Unknown"));
    }
}
