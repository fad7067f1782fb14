// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for registry lookups in the keel-client crate.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use keel_client::{InstanceRegistry, RegisteredInstance};
use keel_core::types::{InstanceId, OwnerId};

struct Entry(InstanceId);

impl RegisteredInstance for Entry {
    fn instance_id(&self) -> InstanceId {
        self.0
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn is_tearing_down(&self) -> bool {
        false
    }
}

/// Cached lookup with 64 owners registered.
fn bench_cached_lookup(c: &mut Criterion) {
    let registry = InstanceRegistry::<Entry>::new("bench");
    let owners: Vec<OwnerId> = (0..64).map(|_| OwnerId::new()).collect();
    for owner in &owners {
        let _ = registry.get_or_create(*owner, || Ok(Arc::new(Entry(InstanceId::new()))));
    }

    let mut next = 0;
    c.bench_function("registry get_or_create (cached)", |b| {
        b.iter(|| {
            let owner = owners[next % owners.len()];
            next += 1;
            black_box(registry.get_or_create(owner, || unreachable!("cached")))
        });
    });
}

/// Insert then remove one entry, allocating and releasing storage.
fn bench_insert_remove(c: &mut Criterion) {
    let registry = InstanceRegistry::<Entry>::new("bench");
    c.bench_function("registry insert + remove", |b| {
        b.iter(|| {
            let owner = OwnerId::new();
            let id = InstanceId::new();
            let _ = registry.get_or_create(owner, || Ok(Arc::new(Entry(id))));
            black_box(registry.remove(owner, id));
        });
    });
}

criterion_group!(benches, bench_cached_lookup, bench_insert_remove);
criterion_main!(benches);
