#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use e133_core::chain::decode_response;
use e133_core::framing::{ACN_PACKET_IDENTIFIER, PREAMBLE_LENGTH, strip_udp_preamble, udp_frame};
use e133_core::rdm::{CommandClass, pid};
use e133_core::{Cid, E133Header, EnvelopeEncoder, RdmRequest, RdmResponse, Uid};
use e133_device::{DeviceConfig, E133Device, RunningDevice};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

pub const ROOT_UID: Uid = Uid::new(0x7a70, 0x0000_0001);
pub const CONTROLLER_UID: Uid = Uid::new(0x4754, 0x0000_0042);
pub const WAIT: Duration = Duration::from_secs(2);

pub fn config(health_check_interval: Duration) -> DeviceConfig {
    DeviceConfig {
        listen: Ipv4Addr::LOCALHOST,
        port: 0,
        health_check_interval_ms: health_check_interval.as_millis() as u64,
        source_name: "test device".to_string(),
        root_uid: ROOT_UID,
        ..DeviceConfig::default()
    }
}

pub async fn start(device: E133Device) -> RunningDevice {
    device.start().await.unwrap()
}

pub fn get_label(destination: Uid, transaction_number: u8) -> RdmRequest {
    RdmRequest {
        destination,
        source: CONTROLLER_UID,
        transaction_number,
        port_id: 1,
        message_count: 0,
        sub_device: 0,
        command_class: CommandClass::Get,
        param_id: pid::DEVICE_LABEL,
        param_data: Bytes::new(),
    }
}

/// A root block as a controller would send it.
pub fn request_block(endpoint: u16, sequence: u32, request: &RdmRequest) -> Bytes {
    let encoder = EnvelopeEncoder::new(Cid::generate());
    let header = E133Header::new("controller", sequence, endpoint);
    encoder.encode_request(&header, request).unwrap().freeze()
}

pub fn request_datagram(endpoint: u16, sequence: u32, request: &RdmRequest) -> Bytes {
    udp_frame(&request_block(endpoint, sequence, request))
}

pub fn tcp_frame(block: &[u8]) -> Vec<u8> {
    let mut out = ACN_PACKET_IDENTIFIER.to_vec();
    out.extend_from_slice(&(block.len() as u32).to_be_bytes());
    out.extend_from_slice(block);
    out
}

pub async fn controller_socket() -> UdpSocket {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap()
}

pub async fn recv_response(socket: &UdpSocket) -> (SocketAddr, E133Header, RdmResponse) {
    let mut buf = [0u8; 1500];
    let (len, from) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("no response")
        .unwrap();
    let block = strip_udp_preamble(&buf[..len]).unwrap();
    let (_, header, response) = decode_response(block).unwrap();
    (from, header, response)
}

/// Read one framed block off a TCP stream.
pub async fn read_tcp_block(stream: &mut TcpStream) -> Vec<u8> {
    let mut preamble = [0u8; PREAMBLE_LENGTH];
    timeout(WAIT, stream.read_exact(&mut preamble))
        .await
        .expect("no block")
        .unwrap();
    assert_eq!(preamble[..12], ACN_PACKET_IDENTIFIER);
    let len = u32::from_be_bytes([preamble[12], preamble[13], preamble[14], preamble[15]]);
    let mut block = vec![0u8; len as usize];
    stream.read_exact(&mut block).await.unwrap();
    block
}

/// Wait for the device to close `stream`.
pub async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match timeout(WAIT, stream.read(&mut buf)).await.expect("still open") {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
