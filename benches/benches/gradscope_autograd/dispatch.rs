use criterion::{black_box, Criterion};
use gradscope_autograd::{GradKey, Tensor};
use gradscope_core::error::Result;

const SIZES: [(usize, &str); 3] = [(16, "small"), (1024, "medium"), (65536, "large")];

fn operand(size: usize, shift: f32) -> Tensor {
    let data: Vec<f32> = (0..size).map(|i| (i % 10) as f32 / 10.0 + shift).collect();
    Tensor::new(data).unwrap()
}

pub fn basic(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("dispatch/basic");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    let operations: Vec<(&str, Box<dyn Fn(&Tensor, &Tensor) -> Result<Tensor>>)> = vec![
        ("add", Box::new(|x, y| x.add(y))),
        ("mul", Box::new(|x, y| x.mul(y))),
        ("exp", Box::new(|x, _| x.exp())),
        ("sum_all", Box::new(|x, _| x.sum_all())),
        ("fastpath_copy", Box::new(|x, _| x.identity())),
    ];

    for (op_name, op_fn) in &operations {
        for &(size, size_name) in &SIZES {
            let x = operand(size, 0.0);
            let y = operand(size, 1.0);

            group.bench_function(format!("{}/untracked/{}", op_name, size_name), |b| {
                b.iter(|| black_box(op_fn(&x, &y)).unwrap())
            });

            // recording cost: tape growth is bounded by recreating the key per batch
            group.bench_function(format!("{}/tracked/{}", op_name, size_name), |b| {
                b.iter_batched(
                    || {
                        let key = GradKey::new();
                        key.attach(&x).unwrap();
                        key
                    },
                    |key| {
                        black_box(op_fn(&x, &y)).unwrap();
                        key
                    },
                    criterion::BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}
