#![allow(unused)]

use std::sync::Arc;

use wirestack::dtls::DtlsFragmentLayer;
use wirestack::quic::{QuicFrameLayer, QuicPacketLayer};
use wirestack::record::{RecordLayer, RecordMode};
use wirestack::{
    Config, ConnectionContext, Container, ContainerKind, ContainerSpec, LayerStack, MemoryPipe,
    ProtocolLayer, ProtocolVersion, TransportLayer,
};

pub fn init_log() {
    let _ = env_logger::try_init();
}

pub fn config() -> Arc<Config> {
    Arc::new(Config::default())
}

/// Fragment -> Record(DTLS) -> Transport.
pub fn dtls_stack(cfg: Arc<Config>, pipe: MemoryPipe) -> LayerStack {
    LayerStack::new(vec![
        Box::new(DtlsFragmentLayer::new(cfg.clone())),
        Box::new(RecordLayer::new(cfg.clone(), RecordMode::Dtls)),
        Box::new(TransportLayer::new(cfg, pipe)),
    ])
}

/// Record(TLS) -> Transport.
pub fn tls_record_stack(cfg: Arc<Config>, pipe: MemoryPipe) -> LayerStack {
    LayerStack::new(vec![
        Box::new(RecordLayer::new(cfg.clone(), RecordMode::Tls)),
        Box::new(TransportLayer::new(cfg, pipe)),
    ])
}

/// QuicFrame -> QuicPacket -> Transport.
pub fn quic_stack(
    cfg: Arc<Config>,
    pipe: MemoryPipe,
    dcid: Vec<u8>,
    scid: Vec<u8>,
) -> LayerStack {
    LayerStack::new(vec![
        Box::new(QuicFrameLayer::new(cfg.clone())),
        Box::new(QuicPacketLayer::new(dcid, scid)),
        Box::new(TransportLayer::new(cfg, pipe)),
    ])
}

pub fn dtls_ctx(is_client: bool) -> ConnectionContext {
    ConnectionContext::new(is_client, ProtocolVersion::DTLS1_2)
}

pub fn quic_ctx(is_client: bool, dcid: &[u8]) -> ConnectionContext {
    let mut ctx = ConnectionContext::new(is_client, ProtocolVersion::TLS1_3);
    ctx.quic.first_dcid = dcid.to_vec();
    wirestack::quic::crypto::derive_initial_secrets(&mut ctx.quic);
    ctx
}

/// A serialized handshake message: type || u24 length || body.
pub fn handshake_message(msg_type: u8, body_len: usize) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + body_len);
    message.push(msg_type);
    message.extend_from_slice(&(body_len as u32).to_be_bytes()[1..]);
    for i in 0..body_len {
        message.push((i % 251) as u8);
    }
    message
}

pub fn message_spec(msg_type: u8) -> ContainerSpec {
    ContainerSpec::new(ContainerKind::Message).with_kind_byte(msg_type)
}

pub fn record_spec(content_type: u8) -> ContainerSpec {
    ContainerSpec::new(ContainerKind::Record).with_kind_byte(content_type)
}

/// The delivered message containers out of a layer result.
pub fn messages(containers: &[Container]) -> Vec<&Container> {
    containers
        .iter()
        .filter(|c| c.kind() == ContainerKind::Message)
        .collect()
}
