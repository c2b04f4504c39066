// benches/benchmark.rs

use criterion::{criterion_group, criterion_main, Criterion};
use pty_launcher::{allocate_pty, Launcher, SpawnRequest};
use std::time::Duration;

// Allocate a pair, run /bin/true on it, and reap the child.
fn allocate_spawn_reap(launcher: &Launcher, request: &SpawnRequest) {
  let mut pair = allocate_pty().expect("Failed to allocate PTY");
  let mut child = launcher
    .spawn(request, &mut pair)
    .expect("Failed to spawn child");
  child.wait().expect("Failed to reap child");
}

fn benchmark_allocation(c: &mut Criterion) {
  c.bench_function("allocate PTY pair", |b| {
    b.iter(|| allocate_pty().expect("Failed to allocate PTY"));
  });
}

fn benchmark_spawn(c: &mut Criterion) {
  let launcher = Launcher::default();
  let fork_exec = SpawnRequest::new("/bin/true");
  let posix_spawn = SpawnRequest::new("/bin/true").controlling_terminal(false);

  c.bench_function("allocate + fork/exec + wait", |b| {
    b.iter(|| allocate_spawn_reap(&launcher, &fork_exec));
  });
  c.bench_function("allocate + posix_spawn + wait", |b| {
    b.iter(|| allocate_spawn_reap(&launcher, &posix_spawn));
  });
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_allocation, benchmark_spawn
}

criterion_main!(benches);
