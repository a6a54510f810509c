//! Correlation of mDNS records into device descriptors.

use super::types::{names_equal, trim_root, DeviceDescriptor};
use mdns::{Record, RecordKind, Response};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::trace;

/// Merges the records of one discovery window into device descriptors.
///
/// Descriptors are keyed by instance name and are never removed. Address
/// records only bind to descriptors whose SRV target is already known;
/// earlier address records are dropped.
#[derive(Debug)]
pub struct DeviceAggregator {
    service: String,
    devices: BTreeMap<String, DeviceDescriptor>,
}

impl DeviceAggregator {
    pub fn new(service: &str) -> Self {
        Self {
            service: trim_root(service).to_string(),
            devices: BTreeMap::new(),
        }
    }

    /// Merge every answer and additional record of a response.
    ///
    /// Records inside one packet are applied pointer first, then location,
    /// then metadata, then addresses, so a responder that batches a full
    /// announcement resolves regardless of section order.
    pub fn ingest(&mut self, response: &Response) {
        let records: Vec<&Record> = response
            .answers
            .iter()
            .chain(&response.additional)
            .collect();

        for record in &records {
            if let RecordKind::PTR(instance) = &record.kind {
                self.on_pointer(&record.name, instance);
            }
        }
        for record in &records {
            if let RecordKind::SRV { port, target, .. } = &record.kind {
                self.on_location(&record.name, target, *port);
            }
        }
        for record in &records {
            if let RecordKind::TXT(strings) = &record.kind {
                self.on_metadata(&record.name, strings);
            }
        }
        for record in &records {
            match &record.kind {
                RecordKind::A(addr) => self.on_address(&record.name, IpAddr::V4(*addr)),
                RecordKind::AAAA(addr) => self.on_address(&record.name, IpAddr::V6(*addr)),
                _ => {}
            }
        }
    }

    /// Close the window and return all descriptors.
    pub fn finish(self) -> Vec<DeviceDescriptor> {
        self.devices.into_values().collect()
    }

    fn on_pointer(&mut self, owner: &str, instance: &str) {
        if !names_equal(owner, &self.service) {
            return;
        }
        self.entry(instance);
    }

    fn on_location(&mut self, owner: &str, target: &str, port: u16) {
        if !self.is_instance(owner) {
            return;
        }
        trace!("SRV {} -> {}:{}", owner, target, port);
        self.entry(owner).set_location(target, port);
    }

    fn on_metadata(&mut self, owner: &str, strings: &[String]) {
        if !self.is_instance(owner) {
            return;
        }
        self.entry(owner).replace_attributes(strings);
    }

    fn on_address(&mut self, owner: &str, address: IpAddr) {
        for device in self.devices.values_mut() {
            if device.matches_host(owner) && device.add_address(address) {
                trace!("{} -> {}", device.instance_name, address);
            }
        }
    }

    fn entry(&mut self, instance: &str) -> &mut DeviceDescriptor {
        let instance = trim_root(instance);
        self.devices
            .entry(instance.to_string())
            .or_insert_with(|| DeviceDescriptor::new(instance))
    }

    /// `<instance>.<service>` with a non-empty instance label.
    fn is_instance(&self, name: &str) -> bool {
        let name = trim_root(name);
        let service = self.service.as_str();
        if name.len() <= service.len() + 1 {
            return false;
        }
        let split = name.len() - service.len();
        name.as_bytes()[split - 1] == b'.' && name[split..].eq_ignore_ascii_case(service)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{a, ptr, record, response, srv, txt};
    use super::*;
    use crate::discovery::types::CAST_SERVICE_TYPE;
    use std::net::Ipv6Addr;

    const INSTANCE: &str = "Living Room._googlecast._tcp.local";
    const HOST: &str = "cast-abcdef.local";

    fn packet(record: Record) -> Response {
        response(vec![record], Vec::new())
    }

    #[test]
    fn test_full_sequence() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(ptr(CAST_SERVICE_TYPE, INSTANCE)));
        aggregator.ingest(&packet(srv(INSTANCE, HOST, 8009)));
        aggregator.ingest(&packet(txt(INSTANCE, &["fn=Living Room", "md=Chromecast"])));
        aggregator.ingest(&packet(a(HOST, [192, 168, 1, 42])));

        let devices = aggregator.finish();
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.instance_name, INSTANCE);
        assert_eq!(device.port, Some(8009));
        assert_eq!(device.addresses, vec!["192.168.1.42".parse::<IpAddr>().unwrap()]);
        assert_eq!(device.friendly_name(), "Living Room");
        assert_eq!(device.model(), "Chromecast");
    }

    #[test]
    fn test_address_before_location_is_dropped() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(a(HOST, [10, 0, 0, 1])));
        aggregator.ingest(&packet(ptr(CAST_SERVICE_TYPE, INSTANCE)));
        aggregator.ingest(&packet(a(HOST, [10, 0, 0, 2])));
        aggregator.ingest(&packet(srv(INSTANCE, HOST, 8009)));
        aggregator.ingest(&packet(a(HOST, [10, 0, 0, 3])));
        aggregator.ingest(&packet(a("cast-abcdef.local.", [10, 0, 0, 3])));
        aggregator.ingest(&packet(record(HOST, RecordKind::AAAA(Ipv6Addr::LOCALHOST))));

        let devices = aggregator.finish();
        assert_eq!(
            devices[0].addresses,
            vec![
                "10.0.0.3".parse::<IpAddr>().unwrap(),
                IpAddr::V6(Ipv6Addr::LOCALHOST)
            ]
        );
    }

    #[test]
    fn test_batched_packet_in_any_section_order() {
        let message = response(
            vec![a(HOST, [192, 168, 1, 42]), srv(INSTANCE, HOST, 8009)],
            vec![ptr(CAST_SERVICE_TYPE, INSTANCE)],
        );

        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&message);

        let devices = aggregator.finish();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].addresses.len(), 1);
    }

    #[test]
    fn test_location_creates_descriptor() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(srv(INSTANCE, HOST, 8009)));

        let devices = aggregator.finish();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].host.as_deref(), Some(HOST));
    }

    #[test]
    fn test_nameserver_records_are_ignored() {
        let mut message = response(Vec::new(), Vec::new());
        message.nameservers.push(ptr(CAST_SERVICE_TYPE, INSTANCE));

        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&message);

        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_foreign_service_is_ignored() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(ptr("_airplay._tcp.local", "Speaker._airplay._tcp.local")));
        aggregator.ingest(&packet(srv("Speaker._airplay._tcp.local", "speaker.local", 7000)));
        aggregator.ingest(&packet(srv(CAST_SERVICE_TYPE, HOST, 8009)));

        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_metadata_last_writer_wins() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(ptr(CAST_SERVICE_TYPE, INSTANCE)));
        aggregator.ingest(&packet(txt(INSTANCE, &["fn=Old name", "md=Chromecast"])));
        aggregator.ingest(&packet(txt(INSTANCE, &["fn=New name"])));

        let devices = aggregator.finish();
        assert_eq!(devices[0].friendly_name(), "New name");
        assert_eq!(devices[0].model(), "unknown");
    }

    #[test]
    fn test_location_overwrite_keeps_bound_addresses() {
        let mut aggregator = DeviceAggregator::new(CAST_SERVICE_TYPE);
        aggregator.ingest(&packet(srv(INSTANCE, HOST, 8009)));
        aggregator.ingest(&packet(a(HOST, [192, 168, 1, 42])));
        aggregator.ingest(&packet(srv(INSTANCE, "cast-new.local", 8010)));

        let devices = aggregator.finish();
        assert_eq!(devices[0].port, Some(8010));
        assert_eq!(devices[0].host.as_deref(), Some("cast-new.local"));
        assert_eq!(devices[0].addresses.len(), 1);
    }
}
