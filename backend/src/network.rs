//! Local address lookup.

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use tracing::warn;

/// Port of the stream stage's HTTP control interface.
pub const VLC_HTTP_PORT: u16 = 8080;

/// First IPv4 address of a non-loopback interface.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Failed to discover network interfaces: {}", e);
            return None;
        }
    };

    first_external_ipv4(interfaces.iter().flat_map(|iface| {
        iface.addr.iter().filter_map(move |addr| match addr {
            Addr::V4(v4) => Some((iface.name.as_str(), v4.ip)),
            Addr::V6(_) => None,
        })
    }))
}

fn first_external_ipv4<'a>(
    candidates: impl IntoIterator<Item = (&'a str, Ipv4Addr)>,
) -> Option<Ipv4Addr> {
    candidates
        .into_iter()
        .find(|(name, ip)| !name.starts_with("lo") && !ip.is_loopback() && !ip.is_link_local())
        .map(|(_, ip)| ip)
}

/// URL of the VLC web interface on this host.
pub fn vlc_interface_url() -> String {
    let host = local_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    format!("http://{}:{}", host, VLC_HTTP_PORT)
}
