mod backward;
mod dispatch;

use criterion::{criterion_group, criterion_main};

criterion_group!(benches, dispatch::basic, backward::basic);
criterion_main!(benches);
