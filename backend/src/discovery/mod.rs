//! Chromecast receiver discovery via multicast DNS.
//!
//! A discovery window opens a short-lived multicast listener, repeats a PTR
//! query for the cast service type and folds every response into
//! [`DeviceDescriptor`]s until the window closes.

pub mod aggregator;
pub mod types;

use async_trait::async_trait;
use dns_parser::{Builder, Packet, QueryClass, QueryType};
use mdns::Response;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

pub use aggregator::DeviceAggregator;
pub use types::{
    DeviceDescriptor, DeviceResponse, CAST_SERVICE_TYPE, DEFAULT_DISCOVERY_TIMEOUT,
    DEFAULT_QUERY_INTERVAL, MDNS_MULTICAST_ADDR, MDNS_PORT, MIN_QUERY_INTERVAL, UNKNOWN_ATTRIBUTE,
};

/// Largest datagram accepted from the mDNS group.
const MAX_PACKET_SIZE: usize = 9000;

/// Discovery errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS listener unavailable: {0}")]
    Unavailable(#[source] io::Error),
    #[error("Discovery timeout must be positive")]
    InvalidTimeout,
}

/// Datagram channel a discovery window runs over.
#[async_trait]
pub trait MdnsTransport: Send + Sync {
    /// Send an encoded query to the mDNS group.
    async fn send_query(&self, packet: &[u8]) -> io::Result<()>;

    /// Next mDNS response. Queries and undecodable datagrams are skipped.
    async fn recv(&self) -> io::Result<Response>;
}

/// UDP socket joined to 224.0.0.251:5353.
pub struct MulticastTransport {
    socket: UdpSocket,
    group: SocketAddr,
}

impl MulticastTransport {
    /// Bind the mDNS port (shared with any local responder) and join the group.
    pub fn bind() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // Other mDNS stacks on the host hold the same port
        socket.set_reuse_address(true)?;
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "freebsd"
        ))]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
        socket.bind(&bind_addr.into())?;

        socket.join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(255)?;

        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        Ok(Self {
            socket: UdpSocket::from_std(std_socket)?,
            group: SocketAddr::V4(SocketAddrV4::new(MDNS_MULTICAST_ADDR, MDNS_PORT)),
        })
    }
}

#[async_trait]
impl MdnsTransport for MulticastTransport {
    async fn send_query(&self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.group).await.map(|_| ())
    }

    async fn recv(&self) -> io::Result<Response> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            trace!("mDNS datagram from {} ({} bytes)", from, len);
            if let Some(response) = decode_response(&buf[..len]) {
                return Ok(response);
            }
        }
    }
}

/// Decode a datagram, keeping only responses.
pub fn decode_response(datagram: &[u8]) -> Option<Response> {
    match Packet::parse(datagram) {
        Ok(packet) if packet.header.query => None,
        Ok(packet) => Some(Response::from_packet(&packet)),
        Err(e) => {
            debug!("Failed to parse mDNS packet: {}", e);
            None
        }
    }
}

/// PTR query for `service`, as sent at the start of every interval.
pub fn build_query(service: &str) -> Vec<u8> {
    let mut builder = Builder::new_query(0, false);
    builder.add_question(service, false, QueryType::PTR, QueryClass::IN);
    // A single question never exceeds the packet limit
    builder.build().unwrap_or_else(|truncated| truncated)
}

type BindTransport = dyn Fn() -> io::Result<Box<dyn MdnsTransport>> + Send + Sync;

/// Entry point for discovery windows.
#[derive(Clone)]
pub struct DiscoveryService {
    service_type: String,
    query_interval: Duration,
    bind: Arc<BindTransport>,
}

impl Default for DiscoveryService {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_INTERVAL)
    }
}

impl DiscoveryService {
    /// Discovery over the multicast group.
    pub fn new(query_interval: Duration) -> Self {
        Self::with_transport(query_interval, || {
            let transport = MulticastTransport::bind()?;
            Ok(Box::new(transport) as Box<dyn MdnsTransport>)
        })
    }

    /// Discovery over transports opened by `bind`, one per window.
    pub fn with_transport<F>(query_interval: Duration, bind: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn MdnsTransport>> + Send + Sync + 'static,
    {
        Self {
            service_type: CAST_SERVICE_TYPE.to_string(),
            query_interval: query_interval.max(MIN_QUERY_INTERVAL),
            bind: Arc::new(bind),
        }
    }

    /// Run one discovery window on a fresh listener.
    ///
    /// The listener is dropped when the window closes or when the returned
    /// future is dropped early.
    pub async fn discover(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        if timeout.is_zero() {
            return Err(DiscoveryError::InvalidTimeout);
        }

        let transport = (self.bind)().map_err(DiscoveryError::Unavailable)?;
        let devices = discover_with(
            transport.as_ref(),
            &self.service_type,
            timeout,
            self.query_interval,
        )
        .await;

        info!(
            "Discovery window of {} ms found {} device(s)",
            timeout.as_millis(),
            devices.len()
        );
        Ok(devices)
    }
}

/// First device with a resolved address, in discovery order.
pub fn pick_receiver(devices: &[DeviceDescriptor]) -> Option<(&DeviceDescriptor, IpAddr)> {
    devices
        .iter()
        .find_map(|device| device.first_address().map(|ip| (device, ip)))
}

/// Run a discovery window over `transport`.
///
/// Queries go out at t=0 and then every `query_interval` until `timeout`
/// elapses. Transport errors are logged and skipped.
pub async fn discover_with<T>(
    transport: &T,
    service: &str,
    timeout: Duration,
    query_interval: Duration,
) -> Vec<DeviceDescriptor>
where
    T: MdnsTransport + ?Sized,
{
    let query = build_query(service);
    let mut aggregator = DeviceAggregator::new(service);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(query_interval.max(MIN_QUERY_INTERVAL));

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                debug!("Sending mDNS query for {}", service);
                if let Err(e) = transport.send_query(&query).await {
                    warn!("Failed to send mDNS query: {}", e);
                }
            }
            result = transport.recv() => {
                match result {
                    Ok(response) => aggregator.ingest(&response),
                    Err(e) => warn!("Error receiving mDNS packet: {}", e),
                }
            }
        }
    }

    aggregator.finish()
}
