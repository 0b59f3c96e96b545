//! Peer network service over UDP multicast.

pub mod protocol;

use crate::bus::{BusReceiver, BusSender};
use crate::config::schema::NetworkConfig;
use crate::dispatch::peer;
use crate::error::Result;
use crate::event::{NetSend, ShowInput};
use crate::faults::{Fault, FaultRegister};
use crate::settings::SettingsStore;
use protocol::Command;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const NO_PEER: u32 = u32::MAX;

/// Counters for `net show`.
#[derive(Debug)]
pub struct NetStatus {
    group: SocketAddrV4,
    listening: AtomicBool,
    rx_frames: AtomicU32,
    tx_frames: AtomicU32,
    last_src: AtomicU32,
}

impl NetStatus {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            group: SocketAddrV4::new(config.multicast_addr, config.port),
            listening: AtomicBool::new(false),
            rx_frames: AtomicU32::new(0),
            tx_frames: AtomicU32::new(0),
            last_src: AtomicU32::new(NO_PEER),
        }
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn rx_frames(&self) -> u32 {
        self.rx_frames.load(Ordering::Relaxed)
    }

    pub fn tx_frames(&self) -> u32 {
        self.tx_frames.load(Ordering::Relaxed)
    }

    pub fn last_src(&self) -> Option<u8> {
        u8::try_from(self.last_src.load(Ordering::Relaxed)).ok()
    }

    fn record_rx(&self, src: u8) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
        self.last_src.store(u32::from(src), Ordering::Relaxed);
    }

    fn record_tx(&self) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Encode an outbound request, stamping our node id as the source.
///
/// # Errors
/// Returns `PropError::Protocol` if `src` is not a valid node id.
pub fn outbound_frame(msg: NetSend, src: u8) -> Result<Vec<u8>> {
    let payload: &[u8] = if msg.cmd == u8::from(Command::Ping) {
        &[]
    } else {
        &[msg.param]
    };
    protocol::encode(msg.dest, src, msg.cmd, payload)
}

async fn open_socket(config: &NetworkConfig) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
    socket.join_multicast_v4(config.multicast_addr, Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(config.ttl)?;
    socket.set_multicast_loop_v4(false)?;
    Ok(socket)
}

pub struct NetService {
    pub config: NetworkConfig,
    pub settings: Arc<SettingsStore>,
    pub show: BusSender<ShowInput>,
    pub status: Arc<NetStatus>,
    pub faults: Arc<FaultRegister>,
}

impl NetService {
    /// Serve until cancelled. Without a usable socket every outbound request
    /// is drained and dropped.
    pub async fn run(self, mut outbound: BusReceiver<NetSend>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("network disabled, outbound frames are dropped");
            drain(&mut outbound, &cancel).await;
            return;
        }

        let socket = match open_socket(&self.config).await {
            Ok(s) => s,
            Err(e) => {
                warn!("network offline, cannot join {}: {e}", self.status.group());
                self.faults.set(Fault::NetworkTask);
                drain(&mut outbound, &cancel).await;
                return;
            }
        };
        self.status.listening.store(true, Ordering::Relaxed);
        info!("network listening on {}", self.status.group());

        let mut buf = [0u8; protocol::MAX_FRAME + 1];
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        debug!("{len} bytes from {from}");
                        let my_id = self.settings.device_id();
                        if let Some(header) = peer::route_frame(my_id, &buf[..len], &self.show) {
                            self.status.record_rx(header.src);
                        }
                    }
                    Err(e) => warn!("network receive failed: {e}"),
                },
                msg = outbound.recv() => {
                    let Some(msg) = msg else { break };
                    self.send(&socket, msg).await;
                }
            }
        }

        self.status.listening.store(false, Ordering::Relaxed);
        info!("network task shutting down");
    }

    async fn send(&self, socket: &UdpSocket, msg: NetSend) {
        let frame = match outbound_frame(msg, self.settings.device_id()) {
            Ok(f) => f,
            Err(e) => {
                warn!("not sending {msg:?}: {e}");
                return;
            }
        };
        match socket.send_to(&frame, self.status.group()).await {
            Ok(_) => {
                debug!("sent {frame:02X?}");
                self.status.record_tx();
            }
            Err(e) => warn!("network send failed: {e}"),
        }
    }
}

async fn drain(outbound: &mut BusReceiver<NetSend>, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            msg = outbound.recv() => match msg {
                Some(msg) => debug!("network offline, dropped {msg:?}"),
                None => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::config::schema::BusConfig;
    use protocol::BROADCAST;

    #[test]
    fn outbound_frames_carry_our_id() {
        let trigger = NetSend {
            dest: BROADCAST,
            cmd: Command::TriggerAnim.into(),
            param: 4,
        };
        assert_eq!(
            outbound_frame(trigger, 12).unwrap(),
            vec![0xA5, 0xFF, 12, 0x02, 4]
        );

        let ping = NetSend {
            dest: 3,
            cmd: Command::Ping.into(),
            param: 0,
        };
        assert_eq!(outbound_frame(ping, 12).unwrap(), vec![0xA5, 3, 12, 0x00]);
    }

    #[test]
    fn status_counters() {
        let status = NetStatus::new(&NetworkConfig::default());
        assert_eq!(status.group().to_string(), "239.255.0.1:49400");
        assert_eq!(status.last_src(), None);
        status.record_rx(9);
        status.record_tx();
        assert_eq!(status.rx_frames(), 1);
        assert_eq!(status.tx_frames(), 1);
        assert_eq!(status.last_src(), Some(9));
    }

    fn service(
        config: NetworkConfig,
        faults: &Arc<FaultRegister>,
    ) -> (NetService, bus::Bus, bus::BusEndpoints) {
        let (bus, ends) = bus::create(&BusConfig::default()).unwrap();
        let status = Arc::new(NetStatus::new(&config));
        let service = NetService {
            config,
            settings: Arc::new(SettingsStore::new(
                std::env::temp_dir().join("propd-net-unused.json"),
            )),
            show: bus.show.clone(),
            status,
            faults: faults.clone(),
        };
        (service, bus, ends)
    }

    #[tokio::test]
    async fn join_failure_degrades_to_draining() {
        let faults = Arc::new(FaultRegister::new());
        // Not a multicast group, so the join is refused.
        let config = NetworkConfig {
            multicast_addr: Ipv4Addr::new(10, 0, 0, 1),
            port: 0,
            ..NetworkConfig::default()
        };
        let (service, bus, ends) = service(config, &faults);
        let status = service.status.clone();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(service.run(ends.net, cancel.clone()));

        let ping = NetSend {
            dest: BROADCAST,
            cmd: Command::Ping.into(),
            param: 0,
        };
        for _ in 0..20 {
            bus.net
                .publish_timeout(ping, std::time::Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert!(faults.is_active(Fault::NetworkTask));
        assert!(!status.is_listening());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_network_drains_without_fault() {
        let faults = Arc::new(FaultRegister::new());
        let config = NetworkConfig {
            enabled: false,
            ..NetworkConfig::default()
        };
        let (service, bus, ends) = service(config, &faults);
        let task = tokio::spawn(service.run(ends.net, CancellationToken::new()));

        let ping = NetSend {
            dest: BROADCAST,
            cmd: Command::Ping.into(),
            param: 0,
        };
        for _ in 0..20 {
            bus.net
                .publish_timeout(ping, std::time::Duration::from_secs(1))
                .await
                .unwrap();
        }
        drop(bus);
        task.await.unwrap();
        assert!(!faults.is_active(Fault::NetworkTask));
    }
}
