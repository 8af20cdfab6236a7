//! Link-local UDP multicast stand-in for a BLE advertiser.
//!
//! The frame currently "on air" lives in a watch channel. An advertiser task
//! re-sends it to ff02::1 every advertise interval, the way a BLE controller
//! repeats an advertisement, and a listener task turns every datagram it
//! hears into an [`Observation`]. Several daemons on one host see each
//! other through multicast loopback.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use blink_core::config::RadioConfig;
use blink_core::wire::MAX_FRAME_LEN;

use super::{Observation, Radio, RadioError};

/// All-nodes link-local multicast group.
pub const MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Observations buffered before the listener waits on the engine.
const OBSERVATION_BACKLOG: usize = 256;

pub struct UdpRadio {
    current: watch::Sender<Option<Bytes>>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpRadio {
    /// Open both sockets and start the advertiser and listener tasks.
    pub fn spawn(config: &RadioConfig) -> Result<(Arc<UdpRadio>, mpsc::Receiver<Observation>)> {
        let interface_index = if config.interface.is_empty() {
            0
        } else {
            if_index(&config.interface)?
        };

        let sender = make_multicast_socket(interface_index)
            .context("failed to create multicast send socket")?;
        let sender = UdpSocket::from_std(sender).context("failed to convert send socket")?;

        let listener = make_listener_socket(interface_index, config.port)
            .context("failed to create multicast listener socket")?;
        let listener = UdpSocket::from_std(listener).context("failed to convert listener socket")?;

        let dest = SocketAddrV6::new(MULTICAST_ADDR, config.port, 0, interface_index);
        let every = Duration::from_millis(config.advertise_interval_ms.max(10));

        let (current, on_air) = watch::channel(None);
        let (observation_tx, observation_rx) = mpsc::channel(OBSERVATION_BACKLOG);

        let tasks = vec![
            tokio::spawn(advertise_loop(sender, dest, on_air, every)),
            tokio::spawn(listen_loop(listener, observation_tx)),
        ];

        tracing::info!(
            interface = %config.interface,
            interface_index,
            port = config.port,
            interval_ms = every.as_millis() as u64,
            "udp radio up"
        );

        Ok((Arc::new(Self { current, tasks }), observation_rx))
    }
}

impl Radio for UdpRadio {
    fn start_broadcast(&self, frame: &[u8]) -> Result<(), RadioError> {
        if self.tasks.iter().any(|task| task.is_finished()) {
            return Err(RadioError::Unavailable("advertiser task exited".into()));
        }
        self.current.send_replace(Some(Bytes::copy_from_slice(frame)));
        Ok(())
    }

    fn stop_broadcast(&self) {
        self.current.send_replace(None);
    }

    fn is_broadcasting(&self) -> bool {
        self.current.borrow().is_some()
    }
}

impl Drop for UdpRadio {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn advertise_loop(
    socket: UdpSocket,
    dest: SocketAddrV6,
    mut on_air: watch::Receiver<Option<Bytes>>,
    every: Duration,
) {
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = on_air.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let frame = on_air.borrow_and_update().clone();
        if let Some(frame) = frame {
            match socket.send_to(&frame, dest).await {
                Ok(n) => tracing::trace!(bytes = n, "advertisement sent"),
                Err(e) => tracing::warn!(error = %e, "advertisement send failed"),
            }
        }
    }
}

async fn listen_loop(socket: UdpSocket, observations: mpsc::Sender<Observation>) {
    // oversized datagrams are truncated and then rejected by the codec
    let mut buf = vec![0u8; MAX_FRAME_LEN * 4];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };
        tracing::trace!(len, %from, "advertisement observed");

        let observation = Observation::new(Bytes::copy_from_slice(&buf[..len]), None);
        if observations.send(observation).await.is_err() {
            tracing::debug!("observation receiver dropped, listener exiting");
            return;
        }
    }
}

/// Non-blocking IPv6 UDP socket for sending to the multicast group.
fn make_multicast_socket(interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket
        .set_multicast_if_v6(interface_index)
        .context("IPV6_MULTICAST_IF")?;
    // link-local only
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    Ok(socket.into())
}

/// Socket bound to `port` and joined to ff02::1.
fn make_listener_socket(interface_index: u32, port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket
        .join_multicast_v6(&MULTICAST_ADDR, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}

/// OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
