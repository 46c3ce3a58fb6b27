use basis_lab::earnings::mlp::{r2_score, MlpParams, MlpPipeline, MlpRegressor, StandardScaler};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn linear_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, 3), |(_, j)| rng.gen_range(-2.0..2.0) * (j + 1) as f64 * 10.0);
    let y = x
        .rows()
        .into_iter()
        .map(|r| 0.3 * r[0] - 0.05 * r[1] + 0.02 * r[2] + 1.0)
        .collect();
    (x, y)
}

fn small_params() -> MlpParams {
    MlpParams {
        hidden_layer_sizes: vec![16, 8],
        batch_size: 32,
        ..MlpParams::default()
    }
}

#[test]
/// Verifies the scaled network learns a linear target well out of sample.
fn pipeline_fits_linear_signal() {
    let (x, y) = linear_data(600, 1);
    let (x_test, y_test) = linear_data(200, 2);
    let mut pipe = MlpPipeline::new(small_params());
    pipe.fit(x.view(), y.view()).expect("fit should succeed");
    let pred = pipe.predict(x_test.view()).unwrap();
    let score = r2_score(y_test.view(), pred.view());
    assert!(score > 0.8, "out-of-sample R2 {score}");
    assert!(pipe.model().n_iter() <= 200);
}

#[test]
/// Verifies a fixed seed reproduces predictions exactly and another seed does not.
fn training_is_deterministic_per_seed() {
    let (x, y) = linear_data(200, 3);
    let fit = |seed: u64| {
        let mut pipe = MlpPipeline::new(MlpParams {
            random_state: seed,
            max_iter: 15,
            ..small_params()
        });
        pipe.fit(x.view(), y.view()).unwrap();
        pipe.predict(x.view()).unwrap()
    };
    assert_eq!(fit(0), fit(0));
    assert_ne!(fit(0), fit(1));
}

#[test]
/// Verifies early stopping tracks a validation score and halts before the
/// epoch cap once the score stops improving.
fn early_stopping_keeps_best_validation_score() {
    let mut rng = StdRng::seed_from_u64(4);
    let x = Array2::from_shape_fn((300, 2), |_| rng.gen_range(-1.0..1.0));
    let y: Array1<f64> = (0..300).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut model = MlpRegressor::new(MlpParams {
        max_iter: 500,
        ..small_params()
    });
    model.fit(x.view(), y.view()).unwrap();
    assert!(model.best_validation_score().is_some());
    assert!(model.n_iter() < 500, "ran {} epochs on pure noise", model.n_iter());
    assert_eq!(model.loss_curve().len(), model.n_iter());

    let mut no_stop = MlpRegressor::new(MlpParams {
        early_stopping: false,
        max_iter: 5,
        n_iter_no_change: 100,
        ..small_params()
    });
    no_stop.fit(x.view(), y.view()).unwrap();
    assert!(no_stop.best_validation_score().is_none());
    assert_eq!(no_stop.n_iter(), 5);
}

#[test]
/// Verifies malformed training data is rejected before any fitting.
fn rejects_bad_training_data() {
    let mut pipe = MlpPipeline::new(small_params());
    let x = Array2::from_elem((3, 2), 1.0);
    assert!(pipe.fit(x.view(), Array1::zeros(2).view()).is_err());

    let mut with_nan = x.clone();
    with_nan[[1, 1]] = f64::NAN;
    assert!(pipe.fit(with_nan.view(), Array1::zeros(3).view()).is_err());

    let empty = Array2::<f64>::zeros((0, 2));
    assert!(pipe.fit(empty.view(), Array1::zeros(0).view()).is_err());

    pipe.fit(x.view(), Array1::zeros(3).view()).unwrap();
    assert!(pipe.predict(Array2::zeros((1, 5)).view()).is_err());
}

#[test]
/// Verifies the scaler uses population standard deviation.
fn scaler_uses_population_std() {
    let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let scaler = StandardScaler::fit(x.view());
    assert!((scaler.mean()[0] - 2.5).abs() < 1e-12);
    assert!((scaler.scale()[0] - 1.25_f64.sqrt()).abs() < 1e-12);
    let t = scaler.transform(x.view());
    assert!((t.sum()).abs() < 1e-12);
}

#[test]
/// Verifies invalid hyperparameters are reported by validation.
fn params_validation() {
    assert!(MlpParams::default().validate().is_ok());
    assert!(MlpParams { hidden_layer_sizes: vec![0], ..MlpParams::default() }.validate().is_err());
    assert!(MlpParams { learning_rate_init: 0.0, ..MlpParams::default() }.validate().is_err());
    assert!(MlpParams { validation_fraction: 1.0, ..MlpParams::default() }.validate().is_err());
}
