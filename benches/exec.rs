use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use lodestone::*;
use rand::Rng;
use std::sync::Arc;

fn argv(parts: &[&[u8]]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
}

fn bench_dispatch_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec");
    group.bench_function("set_get", |b| {
        b.iter_batched(
            || Context::new(&Config::default(), Arc::new(ConsensusState::new())),
            |ctx| {
                let (mut client, _mailbox) = ctx.new_client();
                for i in 0..1000u32 {
                    let k = format!("k{}", i);
                    let v = format!("v{}", i);
                    client.set_argv(argv(&[b"SET", k.as_bytes(), v.as_bytes()]));
                    ctx.dispatch(&mut client);
                    client.set_argv(argv(&[b"GET", k.as_bytes()]));
                    ctx.dispatch(&mut client);
                    black_box(client.take_reply());
                }
                black_box(ctx)
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("gated_random_get", |b| {
        let ctx = Context::new(&Config::default(), Arc::new(ConsensusState::leader()));
        ctx.gate().set_enabled(true);
        let (mut client, _mailbox) = ctx.new_client();
        for i in 0..1000u32 {
            client.set_argv(argv(&[b"SET", format!("k{}", i).as_bytes(), b"v"]));
            ctx.dispatch(&mut client);
        }
        client.take_reply();

        let mut rng = rand::thread_rng();
        b.iter(|| {
            let k = format!("k{}", rng.gen_range(0..1000u32));
            client.set_argv(argv(&[b"GET", k.as_bytes()]));
            ctx.dispatch(&mut client);
            black_box(client.take_reply());
        });
    });

    group.bench_function("push_pop", |b| {
        let ctx = Context::new(&Config::default(), Arc::new(ConsensusState::new()));
        let (mut client, _mailbox) = ctx.new_client();
        b.iter(|| {
            client.set_argv(argv(&[b"RPUSH", b"list", b"item"]));
            ctx.dispatch(&mut client);
            client.set_argv(argv(&[b"LPOP", b"list"]));
            ctx.dispatch(&mut client);
            black_box(client.take_reply());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_dispatch_set_get);
criterion_main!(benches);
