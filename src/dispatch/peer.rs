//! Peer frames to show inputs.

use crate::bus::BusSender;
use crate::event::{ShowCmd, ShowInput};
use crate::net::protocol::{self, Frame, Header, Message};
use tracing::{debug, info, warn};

pub const MODE_OFF: u8 = 0;
pub const MODE_ON: u8 = 1;

/// Map a frame addressed to this node onto a show input.
pub fn peer_event(frame: &Frame<'_>) -> Option<ShowInput> {
    let src = frame.header.src;
    match frame.message() {
        Message::TriggerAnim(anim_id) => {
            info!("peer 0x{src:02X} triggered anim {anim_id}");
            Some(ShowInput::new(ShowCmd::TriggerPeer, anim_id))
        }
        Message::ChangeMode(MODE_OFF) => {
            info!("peer 0x{src:02X} switched show off");
            Some(ShowInput::new(ShowCmd::Stop, 0))
        }
        Message::ChangeMode(MODE_ON) => {
            info!("peer 0x{src:02X} switched show on");
            Some(ShowInput::new(ShowCmd::Start, 0))
        }
        Message::ChangeMode(mode) => {
            warn!("peer 0x{src:02X} sent unsupported mode {mode}");
            None
        }
        Message::Ping => {
            info!("ping from 0x{src:02X}");
            None
        }
        Message::Truncated(cmd) => {
            warn!("peer 0x{src:02X} sent {cmd:?} without payload");
            None
        }
        Message::Unknown(code) => {
            debug!("peer 0x{src:02X} sent unknown command 0x{code:02X}");
            None
        }
    }
}

/// Parse, filter and forward one datagram. Returns the header of a frame that
/// was accepted for this node.
///
/// Malformed frames, frames for other nodes and our own echoes are dropped
/// with a log line only; a peer has no channel for errors.
pub fn route_frame(my_id: u8, buf: &[u8], show: &BusSender<ShowInput>) -> Option<Header> {
    let frame = match protocol::parse(buf) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("dropping datagram: {e}");
            return None;
        }
    };

    let header = frame.header;
    if header.src == my_id {
        return None;
    }
    if !protocol::is_for_me(my_id, header.dst) {
        return None;
    }

    if let Some(input) = peer_event(&frame) {
        show.publish(input);
    }
    Some(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::config::schema::BusConfig;
    use crate::net::protocol::{change_mode, encode, ping, trigger_anim, BROADCAST};

    fn route(my_id: u8, buf: &[u8]) -> (Option<Header>, Vec<ShowInput>) {
        let (bus, mut ends) = bus::create(&BusConfig::default()).unwrap();
        let header = route_frame(my_id, buf, &bus.show);
        (header, ends.show.drain().collect())
    }

    #[test]
    fn trigger_becomes_peer_input() {
        let (header, inputs) = route(1, &trigger_anim(BROADCAST, 7, 3).unwrap());
        assert_eq!(header.map(|h| h.src), Some(7));
        assert_eq!(inputs, vec![ShowInput::new(ShowCmd::TriggerPeer, 3)]);
    }

    #[test]
    fn change_mode_maps_to_start_and_stop() {
        let (_, on) = route(1, &change_mode(1, 2, MODE_ON).unwrap());
        assert_eq!(on, vec![ShowInput::new(ShowCmd::Start, 0)]);
        let (_, off) = route(1, &change_mode(BROADCAST, 2, MODE_OFF).unwrap());
        assert_eq!(off, vec![ShowInput::new(ShowCmd::Stop, 0)]);
        let (header, other) = route(1, &change_mode(1, 2, 9).unwrap());
        assert!(header.is_some());
        assert!(other.is_empty());
    }

    #[test]
    fn ping_and_unknown_publish_nothing() {
        assert!(route(1, &ping(BROADCAST, 2).unwrap()).1.is_empty());
        let (header, inputs) = route(1, &encode(1, 2, 0x42, &[1]).unwrap());
        assert!(header.is_some());
        assert!(inputs.is_empty());
    }

    #[test]
    fn filters_other_nodes_and_own_echo() {
        assert_eq!(route(1, &trigger_anim(5, 2, 0).unwrap()), (None, vec![]));
        assert_eq!(route(1, &trigger_anim(BROADCAST, 1, 0).unwrap()), (None, vec![]));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        assert_eq!(route(1, &[0xA5, 0xFF]), (None, vec![]));
        assert_eq!(route(1, &[0x00, 0xFF, 0x02, 0x02, 0x01]), (None, vec![]));
        // Recognized trigger with no anim id.
        let (header, inputs) = route(1, &[0xA5, 0xFF, 0x02, 0x02]);
        assert!(header.is_some());
        assert!(inputs.is_empty());
    }
}
