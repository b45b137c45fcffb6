use etherparse::{LaxNetSlice, LaxSlicedPacket};
use std::net::IpAddr;

use crate::capture::{CapturedFrame, LinkKind};

const SLL_HEADER_LEN: usize = 16;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;

/// The two facts the accumulator needs from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSample {
    pub source: IpAddr,
    pub bytes: u64,
}

impl TrafficSample {
    /// Extract the source address and counted length of an IP frame.
    ///
    /// IPv4 counts the header and payload bytes present in the capture. IPv6
    /// counts the wire length from the capture header, because the payload
    /// length field excludes the fixed header and is zero for jumbograms.
    /// Returns `None` for non-IP frames and zero-length results.
    pub fn from_frame(frame: &CapturedFrame) -> Option<Self> {
        let sliced = slice(frame)?;

        let (source, bytes) = match sliced.net {
            Some(LaxNetSlice::Ipv4(ipv4)) => {
                let header = ipv4.header();
                let auth_len = ipv4
                    .extensions()
                    .auth
                    .map(|auth| auth.slice().len())
                    .unwrap_or(0);
                let len = header.slice().len() + auth_len + ipv4.payload().payload.len();
                (IpAddr::V4(header.source_addr()), len as u64)
            }
            Some(LaxNetSlice::Ipv6(ipv6)) => {
                (IpAddr::V6(ipv6.header().source_addr()), u64::from(frame.wire_len))
            }
            _ => return None,
        };

        if bytes == 0 {
            return None;
        }
        Some(Self { source, bytes })
    }
}

fn slice(frame: &CapturedFrame) -> Option<LaxSlicedPacket<'_>> {
    match frame.link {
        LinkKind::Ethernet => LaxSlicedPacket::from_ethernet(&frame.data).ok(),
        LinkKind::RawIp => LaxSlicedPacket::from_ip(&frame.data).ok(),
        LinkKind::LinuxSll => {
            if frame.data.len() < SLL_HEADER_LEN {
                return None;
            }
            let protocol = u16::from_be_bytes([frame.data[14], frame.data[15]]);
            if protocol != ETHERTYPE_IPV4 && protocol != ETHERTYPE_IPV6 {
                return None;
            }
            LaxSlicedPacket::from_ip(&frame.data[SLL_HEADER_LEN..]).ok()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    const UDP_OVERHEAD: usize = 20 + 8;

    /// Ethernet/IPv4/UDP frame whose IP total length is `ip_len`.
    pub(crate) fn ipv4_frame(source: [u8; 4], ip_len: usize) -> CapturedFrame {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(source, [10, 0, 0, 254], 64)
            .udp(40000, 9999);
        let payload = vec![0u8; ip_len - UDP_OVERHEAD];
        let mut data = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut data, &payload).unwrap();
        CapturedFrame {
            wire_len: data.len() as u32,
            data,
            link: LinkKind::Ethernet,
        }
    }

    /// Ethernet/IPv6 header only, with the payload length field set to zero.
    pub(crate) fn ipv6_frame_zero_payload_len(source: [u8; 16], wire_len: u32) -> CapturedFrame {
        let mut data = vec![0u8; 14 + 40];
        data[12] = 0x86;
        data[13] = 0xdd;
        data[14] = 0x60; // version 6
        data[20] = 59; // no next header
        data[21] = 64; // hop limit
        data[22..38].copy_from_slice(&source);
        data[38..54].copy_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        CapturedFrame {
            data,
            wire_len,
            link: LinkKind::Ethernet,
        }
    }

    #[test]
    fn test_ipv4_counts_header_and_payload() {
        let frame = ipv4_frame([10, 0, 0, 1], 300);
        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.source, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(sample.bytes, 300);
    }

    #[test]
    fn test_ipv4_ignores_ethernet_padding() {
        let mut frame = ipv4_frame([10, 0, 0, 1], 46);
        frame.data.extend_from_slice(&[0u8; 18]);
        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.bytes, 46);
    }

    #[test]
    fn test_ipv4_truncated_by_snaplen_counts_captured_bytes() {
        let mut frame = ipv4_frame([192, 168, 0, 7], 1500);
        frame.data.truncate(14 + 1000);
        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.bytes, 1000);
    }

    #[test]
    fn test_ipv6_prefers_capture_length_over_payload_field() {
        let mut source = [0u8; 16];
        source[0] = 0x20;
        source[1] = 0x01;
        source[2] = 0x0d;
        source[3] = 0xb8;
        source[15] = 1;
        let frame = ipv6_frame_zero_payload_len(source, 1200);

        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.source, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(sample.bytes, 1200);
    }

    #[test]
    fn test_ipv6_zero_length_is_skipped() {
        let frame = ipv6_frame_zero_payload_len([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], 0);
        assert!(TrafficSample::from_frame(&frame).is_none());
    }

    #[test]
    fn test_non_ip_frame_is_skipped() {
        let mut data = vec![0u8; 42];
        data[12] = 0x08;
        data[13] = 0x06; // ARP
        let frame = CapturedFrame {
            data,
            wire_len: 42,
            link: LinkKind::Ethernet,
        };
        assert!(TrafficSample::from_frame(&frame).is_none());
    }

    #[test]
    fn test_runt_frame_is_skipped() {
        let frame = CapturedFrame {
            data: vec![0u8; 6],
            wire_len: 6,
            link: LinkKind::Ethernet,
        };
        assert!(TrafficSample::from_frame(&frame).is_none());
    }

    #[test]
    fn test_raw_ip_link() {
        let mut frame = ipv4_frame([172, 16, 0, 9], 120);
        frame.data.drain(..14);
        frame.link = LinkKind::RawIp;
        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.source, "172.16.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(sample.bytes, 120);
    }

    #[test]
    fn test_linux_cooked_link() {
        let eth = ipv4_frame([172, 16, 0, 10], 80);
        let mut data = vec![0u8; SLL_HEADER_LEN];
        data[14] = 0x08;
        data[15] = 0x00;
        data.extend_from_slice(&eth.data[14..]);
        let frame = CapturedFrame {
            wire_len: data.len() as u32,
            data,
            link: LinkKind::LinuxSll,
        };
        let sample = TrafficSample::from_frame(&frame).unwrap();
        assert_eq!(sample.bytes, 80);
    }
}
