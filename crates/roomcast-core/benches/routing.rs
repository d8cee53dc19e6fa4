//! Routing table benchmarks for roomcast-core.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use roomcast_core::{connection, AdmittedIdentity, ConnectionSession, RoutingTable};
use roomcast_protocol::{RoomId, UserId};

fn populated(users: i64, rooms: i64) -> (RoutingTable, Vec<ConnectionSession>) {
    let mut table = RoutingTable::new();
    let mut sessions = Vec::with_capacity(users as usize);
    for user in 0..users {
        let (handle, session) = connection::open(AdmittedIdentity::new(
            UserId(user),
            "bench",
            Some(RoomId(user % rooms)),
        ));
        table.insert(handle);
        sessions.push(session);
    }
    (table, sessions)
}

fn bench_register_churn(c: &mut Criterion) {
    let (mut table, _sessions) = populated(10_000, 100);

    c.bench_function("routing/register_unregister", |b| {
        b.iter(|| {
            let (handle, _session) = connection::open(AdmittedIdentity::new(
                UserId(1_000_000),
                "churn",
                Some(RoomId(1)),
            ));
            let id = handle.id();
            table.insert(handle);
            black_box(table.remove(id));
        })
    });
}

fn bench_room_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing/fanout");

    for members in [10i64, 100, 1000] {
        group.throughput(Throughput::Elements(members as u64));
        group.bench_function(format!("{}_members", members), |b| {
            b.iter_batched(
                || populated(members, 1),
                |(table, sessions)| {
                    let payload = bytes::Bytes::from_static(b"{\"type\":\"message\"}");
                    for id in table.room_members(RoomId(0)) {
                        if let Some(handle) = table.get(id) {
                            let _ = handle.try_deliver(payload.clone());
                        }
                    }
                    (table, sessions)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let (table, _sessions) = populated(10_000, 100);

    c.bench_function("routing/snapshot_10k", |b| {
        b.iter(|| black_box(table.snapshot()))
    });
}

criterion_group!(benches, bench_register_churn, bench_room_fanout, bench_snapshot);
criterion_main!(benches);
