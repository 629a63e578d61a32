//! Completion-policy behavior observed through a record stack.

mod common;

use common::*;
use wirestack::{
    ContainerKind, ContainerSpec, LayerConfiguration, MemoryPipe, WireTransport,
};

/// A wire TLS record with the given content type and payload.
fn tls_record(content_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![content_type, 0x03, 0x03];
    wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}

fn receiving_stack(
    datagrams: &[Vec<u8>],
    config: LayerConfiguration,
) -> Vec<wirestack::LayerResult> {
    let cfg = common::config();
    let (pipe, mut peer) = MemoryPipe::pair();
    for d in datagrams {
        peer.write_chunk(d).unwrap();
    }

    let mut stack = tls_record_stack(cfg, pipe);
    let mut ctx = dtls_ctx(false);
    stack.layer_mut(0).core_mut().set_configuration(config);

    stack.receive_data(&mut ctx).expect("receive is never fatal")
}

#[test]
fn specific_policy_completes_when_list_exists() {
    init_log();

    let datagrams = vec![
        tls_record(22, b"hello"),
        tls_record(23, b"unrelated"),
        tls_record(21, b"\x01\x00"),
    ];
    let results = receiving_stack(
        &datagrams,
        LayerConfiguration::Specific(vec![record_spec(22), record_spec(21)]),
    );

    let result = &results[0];
    assert!(result.satisfied);
    assert!(result.mismatch.is_none());
    // The interleaved application-data record was tolerated.
    assert_eq!(result.containers.len(), 3);
}

#[test]
fn specific_policy_unsatisfied_on_timeout() {
    init_log();

    let datagrams = vec![tls_record(22, b"hello")];
    let results = receiving_stack(
        &datagrams,
        LayerConfiguration::Specific(vec![record_spec(22), record_spec(21)]),
    );

    // The stream dried up before the alert arrived: not an error, just
    // unsatisfied.
    let result = &results[0];
    assert!(!result.satisfied);
    assert!(result.mismatch.is_none());
}

#[test]
fn tight_policy_fails_at_first_mismatch() {
    init_log();

    // Configured handshake-then-alert, wire delivers alert first.
    let datagrams = vec![
        tls_record(21, b"\x02\x28"),
        tls_record(22, b"hello"),
    ];
    let results = receiving_stack(
        &datagrams,
        LayerConfiguration::Tight(vec![record_spec(22), record_spec(21)]),
    );

    let result = &results[0];
    assert!(!result.satisfied);
    let mismatch = result.mismatch.as_ref().expect("tight mismatch");
    assert_eq!(mismatch.index, 0);
    assert_eq!(mismatch.actual, Some(21));

    // Failed at the first container, before consuming the whole stream.
    assert_eq!(result.containers.len(), 1);
}

#[test]
fn tight_policy_satisfied_by_exact_order() {
    init_log();

    let datagrams = vec![tls_record(22, b"one"), tls_record(21, b"\x01\x00")];
    let results = receiving_stack(
        &datagrams,
        LayerConfiguration::Tight(vec![record_spec(22), record_spec(21)]),
    );

    let result = &results[0];
    assert!(result.satisfied);
    assert!(result.mismatch.is_none());
}

#[test]
fn receive_till_stops_at_target_and_discards_policy_before_it() {
    init_log();

    let datagrams = vec![
        tls_record(23, b"junk"),
        tls_record(23, b"more junk"),
        tls_record(20, b"\x01"),
        tls_record(22, b"after target, not consumed"),
    ];
    let results = receiving_stack(
        &datagrams,
        LayerConfiguration::ReceiveTill(record_spec(20)),
    );

    let result = &results[0];
    assert!(result.satisfied);
    // Stopped the instant the target appeared.
    assert_eq!(result.containers.len(), 3);
    assert_eq!(result.containers.last().unwrap().kind_byte(), Some(20));
}

#[test]
fn garbage_surfaces_as_unrecognized_not_error() {
    init_log();

    // A length field far beyond the cap.
    let garbage = vec![0x16, 0x03, 0x03, 0xff, 0xff, 0x00];
    let results = receiving_stack(
        &[garbage].to_vec(),
        LayerConfiguration::Specific(vec![record_spec(22)]),
    );

    let result = &results[0];
    assert!(!result.satisfied);
    assert!(result
        .containers
        .iter()
        .any(|c| c.kind() == ContainerKind::Unrecognized));
}

#[test]
fn send_configuration_dispatches_records() {
    init_log();

    let cfg = common::config();
    let (pipe, mut peer) = MemoryPipe::pair();
    let mut stack = tls_record_stack(cfg, pipe);
    let mut ctx = dtls_ctx(true);

    stack
        .layer_mut(0)
        .core_mut()
        .set_configuration(LayerConfiguration::Specific(vec![
            ContainerSpec::new(ContainerKind::Record)
                .with_kind_byte(22)
                .with_payload(b"client hello bytes".to_vec()),
            ContainerSpec::new(ContainerKind::Record)
                .with_kind_byte(20)
                .with_payload(vec![0x01]),
        ]));

    let results = stack.send_configuration(&mut ctx).expect("send");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].containers.len(), 2);

    let mut first = wirestack::Buf::new();
    use std::time::Duration;
    assert_eq!(
        peer.read_chunk(&mut first, Duration::from_millis(1)).unwrap(),
        wirestack::ReadOutcome::Data
    );
    // type || version || length || payload
    assert_eq!(first[0], 22);
    assert_eq!(&first[5..], b"client hello bytes");
}
