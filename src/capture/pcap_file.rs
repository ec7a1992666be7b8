use chrono::DateTime;
use log::{debug, info};
use pcap::{Capture, Offline};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::{Icmpv6Packet, Icmpv6Types};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use super::tcp_analysis::{TcpFlowTracker, TcpSegment};
use super::{CaptureSource, RawCaptureEvent};
use crate::error::{MetricsError, Result};
use crate::models::Timestamp;

const LINKTYPE_NULL: i32 = 0;
const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_RAW_ALT: i32 = 12;
const LINKTYPE_LINUX_SLL: i32 = 113;
const LINKTYPE_IPV4: i32 = 228;
const LINKTYPE_IPV6: i32 = 229;

/// Lecture hors ligne d'un fichier pcap/pcapng
pub struct PcapFileSource {
    capture: Capture<Offline>,
    linktype: i32,
    tracker: TcpFlowTracker,
    path: String,
    packets_read: u64,
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let capture = Capture::from_file(path).map_err(|e| {
            MetricsError::SourceUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let linktype = capture.get_datalink().0;
        info!("Lecture de {} (linktype {})", path.display(), linktype);

        Ok(Self {
            capture,
            linktype,
            tracker: TcpFlowTracker::new(),
            path: path.display().to_string(),
            packets_read: 0,
        })
    }
}

impl CaptureSource for PcapFileSource {
    fn next_event(&mut self) -> Result<Option<RawCaptureEvent>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                self.packets_read += 1;
                let seconds = packet.header.ts.tv_sec as i64;
                let micros = packet.header.ts.tv_usec as i64;
                let event = decode_frame(
                    seconds,
                    micros,
                    packet.header.len,
                    packet.data,
                    self.linktype,
                    &mut self.tracker,
                );
                Ok(Some(event))
            }
            Err(pcap::Error::NoMorePackets) => {
                debug!("{}: {} paquets lus", self.path, self.packets_read);
                Ok(None)
            }
            Err(e) => Err(MetricsError::SourceUnavailable(format!("{}: {}", self.path, e))),
        }
    }

    fn describe(&self) -> String {
        format!("pcap {}", self.path)
    }
}

/// Traduit une trame capturée en événement brut
pub(crate) fn decode_frame(
    seconds: i64,
    micros: i64,
    wire_len: u32,
    data: &[u8],
    linktype: i32,
    tracker: &mut TcpFlowTracker,
) -> RawCaptureEvent {
    let mut event = RawCaptureEvent {
        timestamp: Some(format!("{}.{:06}", seconds, micros)),
        length: Some(wire_len.to_string()),
        ..Default::default()
    };
    let timestamp = DateTime::from_timestamp(seconds, (micros.clamp(0, 999_999) * 1000) as u32);

    match linktype {
        LINKTYPE_ETHERNET => {
            if let Some(ethernet) = EthernetPacket::new(data) {
                event.layers.push("eth".to_string());
                decode_ethertype(ethernet.get_ethertype(), ethernet.payload(), timestamp, tracker, &mut event);
            }
        }
        LINKTYPE_LINUX_SLL => {
            if data.len() >= 16 {
                event.layers.push("sll".to_string());
                let ethertype = EtherType(u16::from_be_bytes([data[14], data[15]]));
                decode_ethertype(ethertype, &data[16..], timestamp, tracker, &mut event);
            }
        }
        LINKTYPE_NULL => {
            if data.len() >= 4 {
                event.layers.push("null".to_string());
                decode_raw_ip(&data[4..], timestamp, tracker, &mut event);
            }
        }
        LINKTYPE_RAW | LINKTYPE_RAW_ALT | LINKTYPE_IPV4 | LINKTYPE_IPV6 => {
            decode_raw_ip(data, timestamp, tracker, &mut event);
        }
        other => debug!("Linktype {} non géré", other),
    }

    event
}

fn decode_ethertype(
    ethertype: EtherType,
    payload: &[u8],
    timestamp: Option<Timestamp>,
    tracker: &mut TcpFlowTracker,
    event: &mut RawCaptureEvent,
) {
    match ethertype {
        EtherTypes::Ipv4 | EtherTypes::Ipv6 => decode_raw_ip(payload, timestamp, tracker, event),
        EtherTypes::Arp => event.layers.push("arp".to_string()),
        _ => {
            // Protocole non géré
        }
    }
}

fn decode_raw_ip(
    data: &[u8],
    timestamp: Option<Timestamp>,
    tracker: &mut TcpFlowTracker,
    event: &mut RawCaptureEvent,
) {
    let Some(first) = data.first() else {
        return;
    };

    match first >> 4 {
        4 => {
            if let Some(ipv4) = Ipv4Packet::new(data) {
                event.layers.push("ip".to_string());
                decode_transport(
                    IpAddr::V4(ipv4.get_source()),
                    IpAddr::V4(ipv4.get_destination()),
                    ipv4.get_next_level_protocol(),
                    ipv4.payload(),
                    timestamp,
                    tracker,
                    event,
                );
            }
        }
        6 => {
            if let Some(ipv6) = Ipv6Packet::new(data) {
                event.layers.push("ipv6".to_string());
                decode_transport(
                    IpAddr::V6(ipv6.get_source()),
                    IpAddr::V6(ipv6.get_destination()),
                    ipv6.get_next_header(),
                    ipv6.payload(),
                    timestamp,
                    tracker,
                    event,
                );
            }
        }
        _ => {}
    }
}

fn decode_transport(
    source: IpAddr,
    destination: IpAddr,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
    timestamp: Option<Timestamp>,
    tracker: &mut TcpFlowTracker,
    event: &mut RawCaptureEvent,
) {
    event.source = Some(source.to_string());
    event.destination = Some(destination.to_string());

    match protocol {
        IpNextHeaderProtocols::Tcp => {
            let Some(tcp) = TcpPacket::new(payload) else {
                return;
            };
            event.layers.push("tcp".to_string());

            let segment = TcpSegment {
                source,
                source_port: tcp.get_source(),
                destination,
                destination_port: tcp.get_destination(),
                sequence: tcp.get_sequence(),
                acknowledgement: tcp.get_acknowledgement(),
                flags: tcp.get_flags() as u16,
                payload_len: tcp.payload().len() as u32,
            };
            if let Some(timestamp) = timestamp {
                let observation = tracker.observe(timestamp, &segment);
                event.tcp_retransmission = observation.retransmission;
                event.tcp_ack_rtt = observation.ack_rtt.map(format_seconds);
            }
        }
        IpNextHeaderProtocols::Udp => {
            if UdpPacket::new(payload).is_some() {
                event.layers.push("udp".to_string());
            }
        }
        IpNextHeaderProtocols::Icmp => {
            let Some(icmp) = IcmpPacket::new(payload) else {
                return;
            };
            event.layers.push("icmp".to_string());

            let icmp_type = icmp.get_icmp_type();
            if icmp_type == IcmpTypes::EchoRequest || icmp_type == IcmpTypes::EchoReply {
                set_echo_fields(event, icmp_type == IcmpTypes::EchoRequest, icmp.payload());
            } else {
                event.icmp_type = Some(icmp_type.0.to_string());
            }
        }
        IpNextHeaderProtocols::Icmpv6 => {
            let Some(icmp) = Icmpv6Packet::new(payload) else {
                return;
            };
            event.layers.push("icmpv6".to_string());

            let icmp_type = icmp.get_icmpv6_type();
            if icmp_type == Icmpv6Types::EchoRequest || icmp_type == Icmpv6Types::EchoReply {
                set_echo_fields(event, icmp_type == Icmpv6Types::EchoRequest, icmp.payload());
            } else {
                event.icmp_type = Some(icmp_type.0.to_string());
            }
        }
        other => event.layers.push(format!("ipproto-{}", other.0)),
    }
}

/// Identifiant et séquence en tête de la charge utile d'un écho ICMP
fn set_echo_fields(event: &mut RawCaptureEvent, request: bool, payload: &[u8]) {
    event.icmp_type = Some(if request { "8" } else { "0" }.to_string());
    if payload.len() >= 4 {
        event.icmp_id = Some(u16::from_be_bytes([payload[0], payload[1]]).to_string());
        event.icmp_seq = Some(u16::from_be_bytes([payload[2], payload[3]]).to_string());
    }
}

fn format_seconds(duration: Duration) -> String {
    format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_header(protocol: u8, payload_len: usize) -> Vec<u8> {
        let total = (20 + payload_len) as u16;
        let mut header = vec![
            0x45, 0x00, 0, 0, 0x00, 0x01, 0x00, 0x00, 64, protocol, 0x00, 0x00, 10, 0, 0, 1, 10, 0, 0, 2,
        ];
        header[2..4].copy_from_slice(&total.to_be_bytes());
        header
    }

    fn ethernet_frame(ip_packet: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(ip_packet);
        frame
    }

    #[test]
    fn test_decode_udp_frame() {
        let udp = [0x04, 0x00, 0x00, 0x50, 0x00, 0x0c, 0x00, 0x00, 1, 2, 3, 4];
        let mut ip = ipv4_header(17, udp.len());
        ip.extend_from_slice(&udp);
        let frame = ethernet_frame(&ip);

        let mut tracker = TcpFlowTracker::new();
        let event = decode_frame(1_700_000_000, 250_000, frame.len() as u32, &frame, LINKTYPE_ETHERNET, &mut tracker);

        assert_eq!(event.layers, vec!["eth", "ip", "udp"]);
        assert_eq!(event.timestamp.as_deref(), Some("1700000000.250000"));
        assert_eq!(event.length, Some(frame.len().to_string()));
        assert_eq!(event.source.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.destination.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_decode_icmp_echo_raw_ip() {
        // type 8, code 0, checksum, id 0x0102, seq 0x0003
        let icmp = [8, 0, 0, 0, 0x01, 0x02, 0x00, 0x03];
        let mut ip = ipv4_header(1, icmp.len());
        ip.extend_from_slice(&icmp);

        let mut tracker = TcpFlowTracker::new();
        let event = decode_frame(1_700_000_000, 0, ip.len() as u32, &ip, LINKTYPE_RAW, &mut tracker);

        assert_eq!(event.layers, vec!["ip", "icmp"]);
        assert_eq!(event.icmp_type.as_deref(), Some("8"));
        assert_eq!(event.icmp_id.as_deref(), Some("258"));
        assert_eq!(event.icmp_seq.as_deref(), Some("3"));
    }

    #[test]
    fn test_decode_non_ip_frame() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0u8; 28]);

        let mut tracker = TcpFlowTracker::new();
        let event = decode_frame(1_700_000_000, 0, frame.len() as u32, &frame, LINKTYPE_ETHERNET, &mut tracker);
        assert_eq!(event.layers, vec!["eth", "arp"]);
        assert_eq!(event.source, None);
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_micros(12_500)), "0.012500000");
    }
}
