//! Simulated datasets shared by the integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use tm_core::{Column, Table};
use tm_prob::math::sigmoid;

/// Treatments, confounders and targets of one simulated study.
pub struct Dataset {
    pub t: Table,
    pub w: Table,
    pub y: Table,
}

fn normal(rng: &mut StdRng) -> f64 {
    StandardNormal.sample(rng)
}

/// Single binary treatment confounded by `w1`, `w2`; continuous `y` with
/// ATE 1 and binary `y_bin`.
///
/// - `g(w) = expit(0.3 + 0.5 w1 - 0.4 w2)`
/// - `y = t + w1 + 0.5 w2 + N(0, 1)`
/// - `P(y_bin = 1) = expit(-0.3 + 0.7 t + 0.5 w1)`
pub fn ate_dataset(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut w1, mut w2, mut t, mut y, mut y_bin) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for _ in 0..n {
        let a = normal(&mut rng);
        let b = normal(&mut rng);
        let treated = rng.random::<f64>() < sigmoid(0.3 + 0.5 * a - 0.4 * b);
        let ti = if treated { 1.0 } else { 0.0 };
        w1.push(a);
        w2.push(b);
        t.push(treated);
        y.push(ti + a + 0.5 * b + normal(&mut rng));
        y_bin.push(rng.random::<f64>() < sigmoid(-0.3 + 0.7 * ti + 0.5 * a));
    }
    Dataset {
        t: Table::new().with_column("t", Column::from_bools(&t)).unwrap(),
        w: Table::new()
            .with_column("w1", Column::continuous(w1))
            .unwrap()
            .with_column("w2", Column::continuous(w2))
            .unwrap(),
        y: Table::new()
            .with_column("y", Column::continuous(y))
            .unwrap()
            .with_column("y_bin", Column::from_bools(&y_bin))
            .unwrap(),
    }
}

/// Single binary treatment with three binary confounders and ATE 1.
///
/// - `w1, w2, w3 ~ Bernoulli(0.5)`
/// - `g(w) = expit(0.5 w1 + 1.5 w2 - w3)`
/// - `y = t + 2 w1 + 3 w2 - 4 w3 + N(0, 1)`
pub fn binary_confounder_dataset(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut w = [Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n)];
    let (mut t, mut y) = (Vec::with_capacity(n), Vec::with_capacity(n));
    for _ in 0..n {
        let wi: [f64; 3] = std::array::from_fn(|_| if rng.random::<bool>() { 1.0 } else { 0.0 });
        let treated = rng.random::<f64>() < sigmoid(0.5 * wi[0] + 1.5 * wi[1] - wi[2]);
        let ti = if treated { 1.0 } else { 0.0 };
        y.push(ti + 2.0 * wi[0] + 3.0 * wi[1] - 4.0 * wi[2] + normal(&mut rng));
        t.push(treated);
        for (col, v) in w.iter_mut().zip(wi) {
            col.push(v);
        }
    }
    let [w1, w2, w3] = w;
    Dataset {
        t: Table::new().with_column("t", Column::from_bools(&t)).unwrap(),
        w: Table::new()
            .with_column("w1", Column::continuous(w1))
            .unwrap()
            .with_column("w2", Column::continuous(w2))
            .unwrap()
            .with_column("w3", Column::continuous(w3))
            .unwrap(),
        y: Table::new().with_column("y", Column::continuous(y)).unwrap(),
    }
}

/// Outcome probability of the interaction study.
pub fn iate_outcome(t1: f64, t2: f64, w: f64) -> f64 {
    sigmoid(-0.5 + 1.0 * t1 + 0.8 * t2 - 1.5 * t1 * t2 + 0.5 * w)
}

/// Two binary treatments drawn jointly from a multinomial logit in `w`,
/// binary outcome with a treatment interaction. Also returns the
/// sample-average interaction effect implied by the outcome model.
pub fn iate_dataset(n: usize, seed: u64) -> (Dataset, f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut w, mut t1, mut t2, mut y) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    let mut truth = 0.0;
    for _ in 0..n {
        let wi = normal(&mut rng);
        // classes (0,0), (0,1), (1,0), (1,1)
        let eta = [0.0, 0.2 + 0.3 * wi, 0.1 - 0.3 * wi, 0.3 + 0.2 * wi];
        let z: f64 = eta.iter().map(|e| e.exp()).sum();
        let u = rng.random::<f64>() * z;
        let mut acc = 0.0;
        let mut class = 3;
        for (c, e) in eta.iter().enumerate() {
            acc += e.exp();
            if u < acc {
                class = c;
                break;
            }
        }
        let (a, b) = (class >= 2, class % 2 == 1);
        let (fa, fb) = (f64::from(u8::from(a)), f64::from(u8::from(b)));
        y.push(rng.random::<f64>() < iate_outcome(fa, fb, wi));
        truth += iate_outcome(1.0, 1.0, wi) - iate_outcome(1.0, 0.0, wi) - iate_outcome(0.0, 1.0, wi)
            + iate_outcome(0.0, 0.0, wi);
        w.push(wi);
        t1.push(a);
        t2.push(b);
    }
    let data = Dataset {
        t: Table::new()
            .with_column("t1", Column::from_bools(&t1))
            .unwrap()
            .with_column("t2", Column::from_bools(&t2))
            .unwrap(),
        w: Table::new().with_column("w", Column::continuous(w)).unwrap(),
        y: Table::new().with_column("y", Column::from_bools(&y)).unwrap(),
    };
    (data, truth / n as f64)
}
