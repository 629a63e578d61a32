//! QUIC frame/packet stacks driven against each other in memory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use wirestack::quic::crypto::install_application_secrets;
use wirestack::quic::{Frame, FrameContainer};
use wirestack::{
    Buf, Config, Container, ContainerKind, ContainerSpec, LayerConfiguration, MemoryPipe,
    ReadOutcome, WireTransport,
};

const DCID: &[u8] = &[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];

fn drain(peer: &mut MemoryPipe) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let mut buf = Buf::new();
        match peer.read_chunk(&mut buf, Duration::from_millis(1)).unwrap() {
            ReadOutcome::Data => out.push(buf.to_vec()),
            _ => break,
        }
    }
    out
}

#[test]
fn crypto_flight_reaches_peer_and_elicits_ack() {
    init_log();

    let cfg = config();

    // Client sends its first handshake flight.
    let (c_pipe, mut c_peer) = MemoryPipe::pair();
    let mut client = quic_stack(cfg.clone(), c_pipe, vec![2; 8], vec![1; 8]);
    let mut ctx_c = quic_ctx(true, DCID);

    let flight = handshake_message(1, 300);
    client.send_data(&mut ctx_c, None, &flight).expect("send");

    let datagrams = drain(&mut c_peer);
    assert_eq!(datagrams.len(), 1, "one Initial packet");

    // Server receives it.
    let (s_pipe, mut s_peer) = MemoryPipe::pair();
    for d in &datagrams {
        s_peer.write_chunk(d).unwrap();
    }
    let mut server = quic_stack(cfg, s_pipe, vec![1; 8], vec![2; 8]);
    let mut ctx_s = quic_ctx(false, DCID);

    server
        .layer_mut(0)
        .core_mut()
        .set_configuration(LayerConfiguration::Specific(vec![message_spec(1)]));

    let results = server.receive_data(&mut ctx_s).expect("receive");
    let result = &results[0];
    assert!(result.satisfied);

    // The CRYPTO stream was reassembled into the original message.
    let delivered = result
        .containers
        .iter()
        .find_map(|c| match c {
            Container::Message(m) => Some(m.bytes.clone()),
            _ => None,
        })
        .expect("delivered message");
    assert_eq!(delivered, flight);

    // The CRYPTO frames were ack-eliciting: the server wrote back one
    // Initial packet carrying the ACK.
    let acks = drain(&mut s_peer);
    assert_eq!(acks.len(), 1);
    assert!(acks[0].len() > 20);
}

#[test]
fn application_data_flows_as_padded_stream_frame() {
    init_log();

    let cfg = Arc::new(
        Config::builder()
            .quic_min_stream_frame_len(48)
            .build(),
    );

    let (c_pipe, mut c_peer) = MemoryPipe::pair();
    let mut client = quic_stack(cfg.clone(), c_pipe, vec![2; 8], vec![1; 8]);
    let mut ctx_c = quic_ctx(true, DCID);

    let (s_pipe, mut s_peer) = MemoryPipe::pair();
    let mut server = quic_stack(cfg, s_pipe, vec![1; 8], vec![2; 8]);
    let mut ctx_s = quic_ctx(false, DCID);

    // Application secrets on both ends: sends become 1-RTT short-header
    // packets.
    let client_secret = vec![0xAA; 32];
    let server_secret = vec![0xBB; 32];
    install_application_secrets(&mut ctx_c.quic, &client_secret, &server_secret);
    install_application_secrets(&mut ctx_s.quic, &client_secret, &server_secret);

    client.send_data(&mut ctx_c, None, b"hi").expect("send");

    let datagrams = drain(&mut c_peer);
    assert_eq!(datagrams.len(), 1);
    // Short header: top bit clear.
    assert_eq!(datagrams[0][0] & 0x80, 0);

    for d in &datagrams {
        s_peer.write_chunk(d).unwrap();
    }

    // The wire payload carries the STREAM frame followed by its padding;
    // receiving until the padding observes both.
    server.layer_mut(0).core_mut().set_configuration(
        LayerConfiguration::ReceiveTill(
            ContainerSpec::new(ContainerKind::QuicFrame).with_kind_byte(0x00),
        ),
    );

    let results = server.receive_data(&mut ctx_s).expect("receive");
    let result = &results[0];
    assert!(result.satisfied);

    let stream = result
        .containers
        .iter()
        .find_map(|c| match c {
            Container::QuicFrame(FrameContainer {
                frame: Frame::Stream(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        })
        .expect("stream frame");
    assert_eq!(stream.stream_id, 0);
    assert_eq!(stream.data, b"hi");

    // The padding floor was honored inside the packet.
    let padded = result.containers.iter().any(|c| {
        matches!(
            c,
            Container::QuicFrame(FrameContainer {
                frame: Frame::Padding { .. },
                ..
            })
        )
    });
    assert!(padded);
}

#[test]
fn tampered_packet_is_preserved_not_fatal() {
    init_log();

    let cfg = config();

    let (c_pipe, mut c_peer) = MemoryPipe::pair();
    let mut client = quic_stack(cfg.clone(), c_pipe, vec![2; 8], vec![1; 8]);
    let mut ctx_c = quic_ctx(true, DCID);

    client
        .send_data(&mut ctx_c, None, &handshake_message(1, 100))
        .expect("send");
    let mut datagram = drain(&mut c_peer).remove(0);
    let last = datagram.len() - 1;
    datagram[last] ^= 0xff;

    let (s_pipe, mut s_peer) = MemoryPipe::pair();
    s_peer.write_chunk(&datagram).unwrap();
    let mut server = quic_stack(cfg, s_pipe, vec![1; 8], vec![2; 8]);
    let mut ctx_s = quic_ctx(false, DCID);

    server
        .layer_mut(1)
        .core_mut()
        .set_configuration(LayerConfiguration::Specific(vec![ContainerSpec::new(
            ContainerKind::QuicPacket,
        )]));

    let results = server.receive_data(&mut ctx_s).expect("never fatal");
    let result = &results[0];

    let packet = result
        .containers
        .iter()
        .find_map(|c| match c {
            Container::QuicPacket(p) => Some(p),
            _ => None,
        })
        .expect("packet container");
    assert!(packet.decrypt_failed);
    assert_eq!(packet.raw, datagram);
}
