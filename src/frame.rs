//! Decoding of captured link-layer frames down to the UDP payload.

use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet_packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet_packet::vlan::VlanPacket;
use pnet_packet::Packet;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::trace;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const LINUX_SLL_HEADER_LEN: usize = 16;
const LINUX_SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;
const VLAN_HEADER_LEN: usize = 4;
const AF_INET: u32 = 2;

/// Link-layer framing of a capture, as reported by the capture facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// BSD loopback: 4-byte address family in host byte order.
    Null,
    RawIp,
    LinuxSll,
    LinuxSll2,
    Unsupported(i32),
}

impl From<i32> for LinkLayer {
    /// Maps a DLT_* / LINKTYPE_* value.
    fn from(dlt: i32) -> Self {
        match dlt {
            1 => LinkLayer::Ethernet,
            0 | 108 => LinkLayer::Null,
            12 | 101 | 228 => LinkLayer::RawIp,
            113 => LinkLayer::LinuxSll,
            276 => LinkLayer::LinuxSll2,
            other => LinkLayer::Unsupported(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Layer {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpLayer {
    pub source_port: u16,
    pub destination_port: u16,
    pub payload: Vec<u8>,
}

/// Structured view of one captured frame. Layers that could not be found
/// or parsed are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    pub ipv4: Option<Ipv4Layer>,
    pub udp: Option<UdpLayer>,
}

impl DecodedFrame {
    /// The application-layer bytes, when the frame carries UDP.
    pub fn payload(&self) -> Option<&[u8]> {
        self.udp.as_ref().map(|udp| udp.payload.as_slice())
    }
}

pub fn decode_frame(link: LinkLayer, data: &[u8]) -> DecodedFrame {
    match network_layer(link, data) {
        Some(ip) => decode_ipv4(ip),
        None => {
            trace!("no IPv4 layer in {:?} frame of {} bytes", link, data.len());
            DecodedFrame::default()
        }
    }
}

/// Strips the link header and returns the IPv4 datagram, if any.
fn network_layer(link: LinkLayer, data: &[u8]) -> Option<&[u8]> {
    match link {
        LinkLayer::Ethernet => {
            let ethernet = EthernetPacket::new(data)?;
            match ethernet.get_ethertype() {
                EtherTypes::Ipv4 => data.get(ETHERNET_HEADER_LEN..),
                EtherTypes::Vlan => {
                    let vlan = VlanPacket::new(&data[ETHERNET_HEADER_LEN..])?;
                    if vlan.get_ethertype() == EtherTypes::Ipv4 {
                        data.get(ETHERNET_HEADER_LEN + VLAN_HEADER_LEN..)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        LinkLayer::Null => {
            let family: [u8; 4] = data.get(..NULL_HEADER_LEN)?.try_into().ok()?;
            if u32::from_le_bytes(family) == AF_INET || u32::from_be_bytes(family) == AF_INET {
                data.get(NULL_HEADER_LEN..)
            } else {
                None
            }
        }
        LinkLayer::RawIp => {
            if data.first().map(|b| b >> 4) == Some(4) {
                Some(data)
            } else {
                None
            }
        }
        LinkLayer::LinuxSll => {
            let protocol = data.get(14..16)?;
            data.get(LINUX_SLL_HEADER_LEN..)
                .filter(|_| is_ipv4_ethertype(protocol))
        }
        LinkLayer::LinuxSll2 => {
            let protocol = data.get(0..2)?;
            data.get(LINUX_SLL2_HEADER_LEN..)
                .filter(|_| is_ipv4_ethertype(protocol))
        }
        LinkLayer::Unsupported(_) => None,
    }
}

fn is_ipv4_ethertype(bytes: &[u8]) -> bool {
    EtherType(u16::from_be_bytes([bytes[0], bytes[1]])) == EtherTypes::Ipv4
}

fn decode_ipv4(data: &[u8]) -> DecodedFrame {
    let Some(ip) = Ipv4Packet::new(data) else {
        return DecodedFrame::default();
    };
    if ip.get_version() != 4 {
        return DecodedFrame::default();
    }

    let ipv4 = Some(Ipv4Layer {
        source: ip.get_source(),
        destination: ip.get_destination(),
    });

    let header_len = ip.get_header_length() as usize * 4;
    let total_len = ip.get_total_length() as usize;
    if header_len < IPV4_HEADER_LEN || total_len < header_len || data.len() < header_len {
        return DecodedFrame { ipv4, udp: None };
    }
    // Only the first fragment holds the UDP header
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp || ip.get_fragment_offset() != 0 {
        return DecodedFrame { ipv4, udp: None };
    }

    // Bounded by the IP total length so link-layer padding is dropped
    let segment = &data[header_len..total_len.min(data.len())];
    let udp = UdpPacket::new(segment).map(|udp| {
        let declared = (udp.get_length() as usize).saturating_sub(UDP_HEADER_LEN);
        let payload = udp.payload();
        let payload = if declared > 0 && declared < payload.len() {
            &payload[..declared]
        } else {
            payload
        };
        UdpLayer {
            source_port: udp.get_source(),
            destination_port: udp.get_destination(),
            payload: payload.to_vec(),
        }
    });

    DecodedFrame { ipv4, udp }
}

/// Builds an Ethernet/IPv4/UDP frame with valid checksums.
///
/// Used to produce capture fixtures and offline replay files. Returns `None`
/// when the payload does not fit in a single IPv4 datagram.
pub fn build_udp_frame(
    source: SocketAddrV4,
    destination: SocketAddrV4,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let ip_len = IPV4_HEADER_LEN + udp_len;
    if ip_len > u16::MAX as usize {
        return None;
    }
    let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ip_len];

    // Locally administered MACs, IPv4 ethertype
    frame[0..6].copy_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    frame[6..12].copy_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    frame[12..14].copy_from_slice(&EtherTypes::Ipv4.0.to_be_bytes());

    {
        let mut udp_packet =
            MutableUdpPacket::new(&mut frame[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..])?;
        udp_packet.set_source(source.port());
        udp_packet.set_destination(destination.port());
        udp_packet.set_length(udp_len as u16);
        udp_packet.set_payload(payload);
        let checksum =
            udp::ipv4_checksum(&udp_packet.to_immutable(), source.ip(), destination.ip());
        udp_packet.set_checksum(checksum);
    }

    {
        let mut ip_packet = MutableIpv4Packet::new(&mut frame[ETHERNET_HEADER_LEN..])?;
        ip_packet.set_version(4);
        ip_packet.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip_packet.set_total_length(ip_len as u16);
        ip_packet.set_ttl(64);
        ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip_packet.set_source(*source.ip());
        ip_packet.set_destination(*destination.ip());
        let checksum = ipv4::checksum(&ip_packet.to_immutable());
        ip_packet.set_checksum(checksum);
    }

    Some(frame)
}
