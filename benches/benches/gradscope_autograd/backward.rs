use criterion::{black_box, Criterion};
use gradscope_autograd::{GradKey, Tensor};

const WIDTHS: [(usize, &str); 3] = [(8, "small"), (64, "medium"), (256, "large")];
const DEPTH: usize = 4;

fn matrix(rows: usize, cols: usize) -> Tensor {
    let data: Vec<f32> = (0..rows * cols).map(|i| ((i % 7) as f32 - 3.0) / 10.0).collect();
    Tensor::from_vec(data, &[rows, cols]).unwrap()
}

// y = sum(relu(...relu(x @ w0)... @ wN))
fn forward(x: &Tensor, weights: &[Tensor]) -> Tensor {
    let mut h = x.clone();
    for w in weights {
        h = h.matmul(w).unwrap().relu().unwrap();
    }
    h.sum_all().unwrap()
}

pub fn basic(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("backward/basic");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for &(width, width_name) in &WIDTHS {
        let x = matrix(width, width);
        let weights: Vec<Tensor> = (0..DEPTH).map(|_| matrix(width, width)).collect();

        group.bench_function(format!("mlp/forward_only/{}", width_name), |b| {
            b.iter(|| black_box(forward(&x, &weights)))
        });

        group.bench_function(format!("mlp/record_and_backward/{}", width_name), |b| {
            b.iter(|| {
                let key = GradKey::new();
                for w in &weights {
                    key.attach_with_callback(w, |g| {
                        black_box(g);
                    })
                    .unwrap();
                }
                let y = forward(&x, &weights);
                let seed = Tensor::ones_like(&y).unwrap();
                key.backward(&[y], &[seed]).unwrap();
            })
        });
    }

    group.finish();
}
