use cascade_core::{
    ClockDomain, Component, PortDesc, PortKind, PortStorage, RuntimeParameters, Scheduler, UpdateCtx,
};
use criterion::{Criterion, criterion_group, criterion_main};

#[derive(Debug)]
struct Counter {
    out: u32,
}

impl Component for Counter {
    fn update(&mut self, ctx: &UpdateCtx, _ports: &mut PortStorage) {
        let _ = ctx;
        self.out = self.out.wrapping_add(1);
    }
}

fn build_counter_domain(n: u32) -> ClockDomain {
    let mut domain = ClockDomain::new(0, 0, "clk".to_string(), 2);
    domain.period = 10_000; // 10ns
    for _ in 0..n {
        let cid = domain.register_component(Box::new(Counter { out: 0 }), false);
        let port = domain.ports.add_port(PortDesc {
            name: format!("cnt{cid}"),
            kind: PortKind::Wired,
            size: 4,
            delay: 0,
            shadow: false,
        });
        let _ = port;
        domain.triggers.push_record(cid, Vec::new());
    }
    domain
}

fn benchmark_scheduler(c: &mut Criterion) {
    c.bench_function("scheduler_build_n1000", |b| {
        b.iter(|| {
            let _domain = build_counter_domain(1000);
        })
    });

    let mut scheduler = Scheduler::new(RuntimeParameters::default());
    scheduler.add_domain(build_counter_domain(1000));
    scheduler.init().unwrap();

    c.bench_function("scheduler_tick_n1000_x1", |b| {
        b.iter(|| {
            scheduler.run_single_tick().unwrap();
        })
    });

    c.bench_function("scheduler_tick_n1000_x1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                scheduler.run_single_tick().unwrap();
            }
        })
    });
}

criterion_group!(benches, benchmark_scheduler);
criterion_main!(benches);
