//! UDP send/receive hook behavior: flow-descriptor fallback, thread-keyed
//! call/return correlation and socket destruction.

use std::sync::Arc;

use nettrace_common::{ConnTuple, PortBinding, TUPLE_TYPE_UDP, TUPLE_V4, TUPLE_V6};
use nettrace_tracer::testkit::{
    flow4_region, flow6_region, msghdr_region, netns_region, sockaddr_in6_region,
    sockaddr_in_region, test_offsets, v4_addr, v6_halves, CollectSink, FakeKernel, SockBuilder,
};
use nettrace_tracer::{HookContext, KernelVersion, Tracer, TracerConfig};

const SK: u64 = 0x6000;
const NET: u64 = 0x7000;
const MSG: u64 = 0x8000;
const SA: u64 = 0x8800;
const FL4: u64 = 0xA000;
const FL6: u64 = 0xC000;
const NETNS_INO: u32 = 4_026_531_992;
const PID_TGID: u64 = (2000 << 32) | 2000;

fn tracer_with(
    config: TracerConfig,
) -> (Tracer<FakeKernel>, FakeKernel, Arc<CollectSink>) {
    let kernel = FakeKernel::new();
    let sink = Arc::new(CollectSink::new());
    let tracer = Tracer::new(
        test_offsets(),
        &config,
        KernelVersion::new(5, 4),
        kernel.clone(),
        Box::new(Arc::clone(&sink)),
    );
    kernel.map_region(NET, netns_region(&test_offsets(), NETNS_INO));
    (tracer, kernel, sink)
}

fn tracer() -> (Tracer<FakeKernel>, FakeKernel, Arc<CollectSink>) {
    tracer_with(TracerConfig::default())
}

fn call(args: &[u64]) -> HookContext {
    let mut ctx = HookContext {
        pid_tgid: PID_TGID,
        ..Default::default()
    };
    ctx.args[..args.len()].copy_from_slice(args);
    ctx
}

fn ret(value: u64) -> HookContext {
    HookContext {
        ret: value,
        pid_tgid: PID_TGID,
        ..Default::default()
    }
}

fn map_connected_sock(kernel: &FakeKernel) {
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .v4([10, 0, 0, 1], [1, 1, 1, 1])
            .sport_bound(6000)
            .dport(9999)
            .netns_ptr(NET)
            .build(),
    );
}

/// Socket with a family and namespace but no addresses or ports, like a
/// never-connected datagram socket.
fn map_unconnected_sock(kernel: &FakeKernel) {
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .family(2)
            .netns_ptr(NET)
            .build(),
    );
}

fn udp_tuple(saddr: [u8; 4], daddr: [u8; 4], sport: u16, dport: u16) -> ConnTuple {
    ConnTuple {
        saddr_l: v4_addr(saddr),
        daddr_l: v4_addr(daddr),
        sport,
        dport,
        netns: NETNS_INO,
        pid: 2000,
        metadata: TUPLE_TYPE_UDP | TUPLE_V4,
        ..Default::default()
    }
}

#[test]
fn connected_send_uses_socket_fields() {
    let (tracer, kernel, _sink) = tracer();
    map_connected_sock(&kernel);

    // 58 bytes on the wire, 8 of them header.
    tracer.udp_send_v4(&call(&[SK, 0, 0, 0, 58]));

    let stats = tracer
        .maps()
        .conn_stats
        .lookup(&udp_tuple([10, 0, 0, 1], [1, 1, 1, 1], 6000, 9999))
        .unwrap();
    assert_eq!(stats.sent_bytes, 50);
    assert_eq!(tracer.telemetry().snapshot().udp_sends_processed, 1);
}

#[test]
fn unconnected_send_falls_back_to_flow_descriptor() {
    let (tracer, kernel, _sink) = tracer();
    map_unconnected_sock(&kernel);
    kernel.map_region(
        FL4,
        flow4_region(&test_offsets(), [10, 0, 0, 1], [10, 0, 0, 2], 5000, 53),
    );

    tracer.udp_send_v4(&call(&[SK, FL4, 0, 0, 108]));

    // Addresses and ports from the flow descriptor; namespace and pid
    // survive from the failed socket read.
    let stats = tracer
        .maps()
        .conn_stats
        .lookup(&udp_tuple([10, 0, 0, 1], [10, 0, 0, 2], 5000, 53))
        .unwrap();
    assert_eq!(stats.sent_bytes, 100);

    let snap = tracer.telemetry().snapshot();
    assert_eq!(snap.udp_sends_processed, 1);
    assert_eq!(snap.udp_sends_missed, 0);
}

#[test]
fn unknown_flow_offsets_count_a_miss() {
    let mut offsets = test_offsets();
    offsets.fl4_offsets_known = false;

    let kernel = FakeKernel::new();
    let tracer = Tracer::new(
        offsets,
        &TracerConfig::default(),
        KernelVersion::new(5, 4),
        kernel.clone(),
        Box::new(Arc::new(CollectSink::new())),
    );
    kernel.map_region(NET, netns_region(&test_offsets(), NETNS_INO));
    map_unconnected_sock(&kernel);
    kernel.map_region(
        FL4,
        flow4_region(&test_offsets(), [10, 0, 0, 1], [10, 0, 0, 2], 5000, 53),
    );

    tracer.udp_send_v4(&call(&[SK, FL4, 0, 0, 108]));

    assert!(tracer.maps().conn_stats.is_empty());
    assert_eq!(tracer.telemetry().snapshot().udp_sends_missed, 1);
}

#[test]
fn v6_send_reads_size_from_its_own_position() {
    let saddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    let daddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    let (tracer, kernel, _sink) = tracer();
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .v6(saddr, daddr)
            .sport_bound(6000)
            .dport(53)
            .netns_ptr(NET)
            .build(),
    );

    tracer.udp_send_v6(&call(&[SK, 0, 0, 58]));

    let (saddr_h, saddr_l) = v6_halves(saddr);
    let (daddr_h, daddr_l) = v6_halves(daddr);
    let t = ConnTuple {
        saddr_h,
        saddr_l,
        daddr_h,
        daddr_l,
        sport: 6000,
        dport: 53,
        netns: NETNS_INO,
        pid: 2000,
        metadata: TUPLE_TYPE_UDP | TUPLE_V6,
    };
    let stats = tracer.maps().conn_stats.lookup(&t).unwrap();
    assert_eq!(stats.sent_bytes, 50);
}

#[test]
fn unconnected_v6_send_falls_back_to_flow_descriptor() {
    let saddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    let daddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

    let (tracer, kernel, _sink) = tracer();
    // v6 socket with a family and namespace but no addresses.
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .family(10)
            .netns_ptr(NET)
            .build(),
    );
    kernel.map_region(FL6, flow6_region(&test_offsets(), saddr, daddr, 5000, 53));

    tracer.udp_send_v6(&call(&[SK, 0, 0, 108, 0, 0, FL6]));

    let (saddr_h, saddr_l) = v6_halves(saddr);
    let (daddr_h, daddr_l) = v6_halves(daddr);
    let t = ConnTuple {
        saddr_h,
        saddr_l,
        daddr_h,
        daddr_l,
        sport: 5000,
        dport: 53,
        netns: NETNS_INO,
        pid: 2000,
        metadata: TUPLE_TYPE_UDP | TUPLE_V6,
    };
    let stats = tracer.maps().conn_stats.lookup(&t).unwrap();
    assert_eq!(stats.sent_bytes, 100);

    let snap = tracer.telemetry().snapshot();
    assert_eq!(snap.udp_sends_processed, 1);
    assert_eq!(snap.udp_sends_missed, 0);
}

#[test]
fn unknown_v6_flow_offsets_count_a_miss() {
    let mut offsets = test_offsets();
    offsets.fl6_offsets_known = false;

    let kernel = FakeKernel::new();
    let tracer = Tracer::new(
        offsets,
        &TracerConfig::default(),
        KernelVersion::new(5, 4),
        kernel.clone(),
        Box::new(Arc::new(CollectSink::new())),
    );
    kernel.map_region(NET, netns_region(&test_offsets(), NETNS_INO));
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .family(10)
            .netns_ptr(NET)
            .build(),
    );
    kernel.map_region(
        FL6,
        flow6_region(&test_offsets(), [1; 16], [2; 16], 5000, 53),
    );

    tracer.udp_send_v6(&call(&[SK, 0, 0, 108, 0, 0, FL6]));

    assert!(tracer.maps().conn_stats.is_empty());
    assert_eq!(tracer.telemetry().snapshot().udp_sends_missed, 1);
}

#[test]
fn recv_pair_lifts_destination_from_message_descriptor() {
    let (tracer, kernel, _sink) = tracer();
    map_connected_sock(&kernel);
    kernel.map_region(MSG, msghdr_region(SA));
    kernel.map_region(SA, sockaddr_in_region(53, [8, 8, 8, 8]));

    tracer.udp_recv(&call(&[SK, MSG, 0, 0, 0]));
    tracer.udp_recv_return(&ret(120));

    // The message descriptor's destination wins over the socket fields.
    let stats = tracer
        .maps()
        .conn_stats
        .lookup(&udp_tuple([10, 0, 0, 1], [8, 8, 8, 8], 6000, 53))
        .unwrap();
    assert_eq!(stats.recv_bytes, 120);
}

#[test]
fn recv_lifts_v6_destination_from_message_descriptor() {
    let saddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    let sock_daddr: [u8; 16] = [0x20, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
    let msg_daddr: [u8; 16] = [0x26, 0x06, 0x47, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x11, 0x11];

    let (tracer, kernel, _sink) = tracer();
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .v6(saddr, sock_daddr)
            .sport_bound(6000)
            .dport(9999)
            .netns_ptr(NET)
            .build(),
    );
    kernel.map_region(MSG, msghdr_region(SA));
    kernel.map_region(SA, sockaddr_in6_region(53, msg_daddr));

    tracer.udp_recv(&call(&[SK, MSG, 0, 0, 0]));
    tracer.udp_recv_return(&ret(120));

    let (saddr_h, saddr_l) = v6_halves(saddr);
    let (daddr_h, daddr_l) = v6_halves(msg_daddr);
    let t = ConnTuple {
        saddr_h,
        saddr_l,
        daddr_h,
        daddr_l,
        sport: 6000,
        dport: 53,
        netns: NETNS_INO,
        pid: 2000,
        metadata: TUPLE_TYPE_UDP | TUPLE_V6,
    };
    let stats = tracer.maps().conn_stats.lookup(&t).unwrap();
    assert_eq!(stats.recv_bytes, 120);
}

#[test]
fn recv_record_is_consumed_exactly_once() {
    let (tracer, kernel, _sink) = tracer();
    map_connected_sock(&kernel);
    kernel.map_region(MSG, msghdr_region(SA));
    kernel.map_region(SA, sockaddr_in_region(53, [8, 8, 8, 8]));

    tracer.udp_recv(&call(&[SK, MSG, 0, 0, 0]));
    tracer.udp_recv_return(&ret(120));
    // A second return for the same thread finds no record.
    tracer.udp_recv_return(&ret(700));

    let stats = tracer
        .maps()
        .conn_stats
        .lookup(&udp_tuple([10, 0, 0, 1], [8, 8, 8, 8], 6000, 53))
        .unwrap();
    assert_eq!(stats.recv_bytes, 120);
    assert!(tracer.maps().udp_recv_args.is_empty());
}

#[test]
fn return_without_call_is_ignored() {
    let (tracer, _kernel, _sink) = tracer();
    tracer.udp_recv_return(&ret(120));
    assert!(tracer.maps().conn_stats.is_empty());
}

#[test]
fn peeks_are_never_recorded() {
    let (tracer, kernel, _sink) = tracer();
    map_connected_sock(&kernel);

    // MSG_PEEK in the flags position.
    tracer.udp_recv(&call(&[SK, MSG, 0, 0, 2]));
    assert!(tracer.maps().udp_recv_args.is_empty());

    tracer.udp_recv_return(&ret(120));
    assert!(tracer.maps().conn_stats.is_empty());
}

#[test]
fn error_return_consumes_the_record_without_recording() {
    let (tracer, kernel, _sink) = tracer();
    map_connected_sock(&kernel);

    tracer.udp_recv(&call(&[SK, 0, 0, 0, 0]));
    tracer.udp_recv_return(&ret((-11i64) as u64));

    assert!(tracer.maps().conn_stats.is_empty());
    assert!(tracer.maps().udp_recv_args.is_empty());
}

#[test]
fn destroy_retires_flow_and_drops_binding() {
    let (tracer, kernel, sink) = tracer_with(TracerConfig {
        closed_batch_capacity: 1,
        ..Default::default()
    });
    map_connected_sock(&kernel);

    let binding = PortBinding {
        netns: 0,
        port: 6000,
        _pad: 0,
    };
    tracer.maps().udp_port_bindings.insert(binding, 1);

    tracer.udp_send_v4(&call(&[SK, 0, 0, 0, 58]));
    tracer.udp_destroy(&call(&[SK]));
    tracer.udp_destroy_return(&ret(0));

    assert_eq!(tracer.maps().udp_port_bindings.lookup(&binding), None);
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0][0].tup,
        udp_tuple([10, 0, 0, 1], [1, 1, 1, 1], 6000, 9999)
    );
    assert_eq!(batches[0][0].stats.sent_bytes, 50);
    assert_eq!(tracer.telemetry().snapshot().missed_udp_close, 0);
}

#[test]
fn destroy_with_unreadable_tuple_still_drops_binding() {
    let (tracer, kernel, sink) = tracer_with(TracerConfig {
        closed_batch_capacity: 1,
        ..Default::default()
    });
    // Bound port readable, addresses not.
    kernel.map_region(
        SK,
        SockBuilder::new(&test_offsets())
            .family(2)
            .sport_bound(6000)
            .netns_ptr(NET)
            .build(),
    );

    let binding = PortBinding {
        netns: 0,
        port: 6000,
        _pad: 0,
    };
    tracer.maps().udp_port_bindings.insert(binding, 1);

    tracer.udp_destroy(&call(&[SK]));
    tracer.udp_destroy_return(&ret(0));

    assert_eq!(tracer.maps().udp_port_bindings.lookup(&binding), None);
    assert_eq!(sink.batch_count(), 0);
    assert_eq!(tracer.telemetry().snapshot().missed_udp_close, 1);
}
