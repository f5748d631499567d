// network/parser.rs - Raw frame decoding (L2 framing, IPv4/IPv6, TCP/UDP)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::network::types::Protocol;

// Link-layer types reported by pcap.
const DLT_NULL: i32 = 0;
const DLT_EN10MB: i32 = 1;
const DLT_RAW: i32 = 12;

const ETH_HDR_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const IPV4_MIN_HDR_LEN: usize = 20;
const IPV6_HDR_LEN: usize = 40;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

// IPv6 extension headers that can sit between the fixed header and L4.
const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTS: u8 = 60;

/// Addressing and size information decoded from one frame.
///
/// `data_len` is the transport payload length only; TCP/UDP header bytes are
/// not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMeta {
    pub protocol: Protocol,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub data_len: u64,
}

/// Decoder for one capture handle. The link type decides how the frame's
/// L2 header is peeled before IP parsing.
#[derive(Debug, Clone, Copy)]
pub struct PacketDecoder {
    linktype: i32,
}

impl PacketDecoder {
    pub fn new(linktype: i32) -> Self {
        Self { linktype }
    }

    /// Decode a raw captured frame. Returns `None` for anything that is not
    /// a well-formed IPv4/IPv6 frame carrying TCP or UDP; malformed frames
    /// are skipped silently.
    pub fn decode(&self, data: &[u8]) -> Option<PacketMeta> {
        match self.linktype {
            DLT_EN10MB => {
                if data.len() < ETH_HDR_LEN {
                    return None;
                }
                let ethertype = u16::from_be_bytes([data[12], data[13]]);
                match ethertype {
                    ETHERTYPE_IPV4 => parse_ipv4(&data[ETH_HDR_LEN..]),
                    ETHERTYPE_IPV6 => parse_ipv6(&data[ETH_HDR_LEN..]),
                    _ => None,
                }
            }
            // BSD loopback: 4-byte AF header in host byte order.
            DLT_NULL => {
                if data.len() < 4 {
                    return None;
                }
                parse_ip_auto(&data[4..])
            }
            // No link-layer header at all.
            DLT_RAW => parse_ip_auto(data),
            _ => None,
        }
    }
}

/// Dispatch on the IP version nibble when no EtherType is available.
fn parse_ip_auto(data: &[u8]) -> Option<PacketMeta> {
    match data.first()? >> 4 {
        4 => parse_ipv4(data),
        6 => parse_ipv6(data),
        _ => None,
    }
}

fn parse_ipv4(data: &[u8]) -> Option<PacketMeta> {
    if data.len() < IPV4_MIN_HDR_LEN {
        return None;
    }

    let header_len = ((data[0] & 0x0F) as usize) * 4;
    if header_len < IPV4_MIN_HDR_LEN || data.len() < header_len {
        return None;
    }

    // Non-first fragments carry no L4 header.
    let flags_frag = u16::from_be_bytes([data[6], data[7]]);
    if flags_frag & 0x1FFF != 0 {
        return None;
    }

    // Trim Ethernet padding: the IP total length is authoritative.
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if total_len < header_len || total_len > data.len() {
        return None;
    }

    let src_ip = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    let dst_ip = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));

    parse_l4(data[9], &data[header_len..total_len], src_ip, dst_ip)
}

fn parse_ipv6(data: &[u8]) -> Option<PacketMeta> {
    if data.len() < IPV6_HDR_LEN {
        return None;
    }

    let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    if data.len() < IPV6_HDR_LEN + payload_len {
        return None;
    }

    let src_bytes: [u8; 16] = data[8..24].try_into().ok()?;
    let dst_bytes: [u8; 16] = data[24..40].try_into().ok()?;
    let src_ip = IpAddr::V6(Ipv6Addr::from(src_bytes));
    let dst_ip = IpAddr::V6(Ipv6Addr::from(dst_bytes));

    let payload = &data[IPV6_HDR_LEN..IPV6_HDR_LEN + payload_len];
    let (next_header, offset) = skip_extension_headers(data[6], payload);

    parse_l4(next_header, &payload[offset..], src_ip, dst_ip)
}

/// Walk the IPv6 extension header chain, returning the first non-extension
/// protocol and the offset where its header starts.
fn skip_extension_headers(mut next_header: u8, data: &[u8]) -> (u8, usize) {
    let mut offset = 0;
    loop {
        match next_header {
            EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTS => {
                if offset + 2 > data.len() {
                    return (next_header, offset);
                }
                let ext_len = (data[offset + 1] as usize + 1) * 8;
                if offset + ext_len > data.len() {
                    return (next_header, offset);
                }
                next_header = data[offset];
                offset += ext_len;
            }
            EXT_FRAGMENT => {
                if offset + 8 > data.len() {
                    return (next_header, offset);
                }
                next_header = data[offset];
                offset += 8;
            }
            _ => return (next_header, offset),
        }
    }
}

fn parse_l4(proto: u8, l4: &[u8], src_ip: IpAddr, dst_ip: IpAddr) -> Option<PacketMeta> {
    match proto {
        IPPROTO_TCP => {
            if l4.len() < 20 {
                return None;
            }
            let header_len = ((l4[12] >> 4) as usize) * 4;
            if header_len < 20 || l4.len() < header_len {
                return None;
            }
            Some(PacketMeta {
                protocol: Protocol::Tcp,
                src_ip,
                src_port: u16::from_be_bytes([l4[0], l4[1]]),
                dst_ip,
                dst_port: u16::from_be_bytes([l4[2], l4[3]]),
                data_len: (l4.len() - header_len) as u64,
            })
        }
        IPPROTO_UDP => {
            if l4.len() < 8 {
                return None;
            }
            Some(PacketMeta {
                protocol: Protocol::Udp,
                src_ip,
                src_port: u16::from_be_bytes([l4[0], l4[1]]),
                dst_ip,
                dst_port: u16::from_be_bytes([l4[2], l4[3]]),
                data_len: (l4.len() - 8) as u64,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a minimal Ethernet/IP/L4 frame for decoder tests.
    struct FrameBuilder {
        ethertype: u16,
        src: IpAddr,
        dst: IpAddr,
        proto: u8,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
        fragment_offset: u16,
        padding: usize,
    }

    impl FrameBuilder {
        fn tcp_v4(src: &str, dst: &str, src_port: u16, dst_port: u16) -> Self {
            Self {
                ethertype: ETHERTYPE_IPV4,
                src: src.parse().unwrap(),
                dst: dst.parse().unwrap(),
                proto: IPPROTO_TCP,
                src_port,
                dst_port,
                payload: Vec::new(),
                fragment_offset: 0,
                padding: 0,
            }
        }

        fn udp_v4(src: &str, dst: &str, src_port: u16, dst_port: u16) -> Self {
            Self {
                proto: IPPROTO_UDP,
                ..Self::tcp_v4(src, dst, src_port, dst_port)
            }
        }

        fn tcp_v6(src: &str, dst: &str, src_port: u16, dst_port: u16) -> Self {
            Self {
                ethertype: ETHERTYPE_IPV6,
                ..Self::tcp_v4(src, dst, src_port, dst_port)
            }
        }

        fn payload(mut self, len: usize) -> Self {
            self.payload = vec![0xAB; len];
            self
        }

        fn fragment_offset(mut self, offset: u16) -> Self {
            self.fragment_offset = offset;
            self
        }

        fn padding(mut self, len: usize) -> Self {
            self.padding = len;
            self
        }

        fn l4_header(&self) -> Vec<u8> {
            let mut l4 = Vec::new();
            l4.extend_from_slice(&self.src_port.to_be_bytes());
            l4.extend_from_slice(&self.dst_port.to_be_bytes());
            if self.proto == IPPROTO_TCP {
                l4.extend_from_slice(&0u32.to_be_bytes()); // seq
                l4.extend_from_slice(&0u32.to_be_bytes()); // ack
                l4.push(0x50); // data offset 5 words
                l4.push(0x18); // PSH|ACK
                l4.extend_from_slice(&0xFFFFu16.to_be_bytes()); // window
                l4.extend_from_slice(&0u32.to_be_bytes()); // checksum + urgent
            } else {
                let udp_len = (8 + self.payload.len()) as u16;
                l4.extend_from_slice(&udp_len.to_be_bytes());
                l4.extend_from_slice(&0u16.to_be_bytes()); // checksum
            }
            l4
        }

        fn build(&self) -> Vec<u8> {
            let mut frame = vec![0u8; 12]; // dst + src MAC
            frame.extend_from_slice(&self.ethertype.to_be_bytes());

            let mut l4 = self.l4_header();
            l4.extend_from_slice(&self.payload);

            match (self.src, self.dst) {
                (IpAddr::V4(src), IpAddr::V4(dst)) => {
                    let total_len = (IPV4_MIN_HDR_LEN + l4.len()) as u16;
                    frame.push(0x45);
                    frame.push(0);
                    frame.extend_from_slice(&total_len.to_be_bytes());
                    frame.extend_from_slice(&0u16.to_be_bytes()); // id
                    frame.extend_from_slice(&self.fragment_offset.to_be_bytes());
                    frame.push(64); // ttl
                    frame.push(self.proto);
                    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum
                    frame.extend_from_slice(&src.octets());
                    frame.extend_from_slice(&dst.octets());
                }
                (IpAddr::V6(src), IpAddr::V6(dst)) => {
                    frame.extend_from_slice(&[0x60, 0, 0, 0]);
                    frame.extend_from_slice(&(l4.len() as u16).to_be_bytes());
                    frame.push(self.proto);
                    frame.push(64); // hop limit
                    frame.extend_from_slice(&src.octets());
                    frame.extend_from_slice(&dst.octets());
                }
                _ => unreachable!("mixed address families"),
            }

            frame.extend_from_slice(&l4);
            frame.extend_from_slice(&vec![0u8; self.padding]);
            frame
        }
    }

    #[test]
    fn test_tcp_ipv4_payload_length() {
        let frame = FrameBuilder::tcp_v4("10.0.0.5", "93.184.216.34", 55000, 443)
            .payload(120)
            .build();
        let meta = PacketDecoder::new(DLT_EN10MB).decode(&frame).unwrap();

        assert_eq!(meta.protocol, Protocol::Tcp);
        assert_eq!(meta.src_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(meta.src_port, 55000);
        assert_eq!(meta.dst_ip, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert_eq!(meta.dst_port, 443);
        // Header bytes are excluded from data_len.
        assert_eq!(meta.data_len, 120);
    }

    #[test]
    fn test_tcp_empty_payload() {
        let frame = FrameBuilder::tcp_v4("10.0.0.5", "1.1.1.1", 40000, 80).build();
        let meta = PacketDecoder::new(DLT_EN10MB).decode(&frame).unwrap();
        assert_eq!(meta.data_len, 0);
    }

    #[test]
    fn test_udp_ipv4() {
        let frame = FrameBuilder::udp_v4("192.168.1.2", "8.8.8.8", 51234, 53)
            .payload(33)
            .build();
        let meta = PacketDecoder::new(DLT_EN10MB).decode(&frame).unwrap();

        assert_eq!(meta.protocol, Protocol::Udp);
        assert_eq!(meta.dst_port, 53);
        assert_eq!(meta.data_len, 33);
    }

    #[test]
    fn test_ethernet_padding_is_not_counted() {
        // Short UDP datagrams get padded to the 60-byte Ethernet minimum;
        // the IP total length must win over the captured length.
        let frame = FrameBuilder::udp_v4("192.168.1.2", "8.8.8.8", 51234, 53)
            .payload(4)
            .padding(14)
            .build();
        let meta = PacketDecoder::new(DLT_EN10MB).decode(&frame).unwrap();
        assert_eq!(meta.data_len, 4);
    }

    #[test]
    fn test_tcp_ipv6() {
        let frame = FrameBuilder::tcp_v6("2001:db8::1", "2001:db8::2", 10000, 8080)
            .payload(64)
            .build();
        let meta = PacketDecoder::new(DLT_EN10MB).decode(&frame).unwrap();

        assert_eq!(meta.protocol, Protocol::Tcp);
        assert_eq!(meta.src_ip, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(meta.data_len, 64);
    }

    #[test]
    fn test_arp_frame_skipped() {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&0x0806u16.to_be_bytes());
        frame.extend_from_slice(&[0u8; 28]);
        assert!(PacketDecoder::new(DLT_EN10MB).decode(&frame).is_none());
    }

    #[test]
    fn test_non_first_fragment_skipped() {
        let frame = FrameBuilder::tcp_v4("10.0.0.1", "10.0.0.2", 80, 12345)
            .fragment_offset(185)
            .build();
        assert!(PacketDecoder::new(DLT_EN10MB).decode(&frame).is_none());
    }

    #[test]
    fn test_truncated_frame_skipped() {
        assert!(PacketDecoder::new(DLT_EN10MB).decode(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_null_loopback_framing() {
        let ethernet = FrameBuilder::udp_v4("127.0.0.1", "127.0.0.1", 5353, 5353)
            .payload(10)
            .build();
        // Swap the Ethernet header for the 4-byte BSD loopback AF header.
        let mut frame = 2u32.to_ne_bytes().to_vec();
        frame.extend_from_slice(&ethernet[ETH_HDR_LEN..]);

        let meta = PacketDecoder::new(DLT_NULL).decode(&frame).unwrap();
        assert_eq!(meta.protocol, Protocol::Udp);
        assert_eq!(meta.data_len, 10);
    }
}
