use std::{env, fs, num::NonZeroUsize, path::PathBuf, thread};

use completion::{
    Algorithm, FactorModel, Workspace, build_solver,
    eval::{mae, rmse},
    io::{read_full, read_tensor},
    train::train,
};
use ndarray::s;
use partition::{GroupReducer, Layer, LocalReducer, Reducer};

fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = env::temp_dir().join(format!(
        "completion-distributed-{}-{name}",
        std::process::id()
    ));
    fs::write(&path, content).unwrap();
    path
}

/// Runs `f` on `npes` worker threads sharing one reduction group.
fn run_group<F, T>(npes: usize, f: F) -> Vec<T>
where
    F: Fn(GroupReducer) -> T + Send + Sync,
    T: Send,
{
    let group = GroupReducer::group(NonZeroUsize::new(npes).unwrap());
    thread::scope(|s| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|reducer| s.spawn(|| f(reducer)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// A 3-mode tensor whose mode-0 indices only use the first 4 of 6 slices.
fn lopsided() -> String {
    let mut lines = String::new();
    for k in 0..40usize {
        let (i, j, l) = (k % 4 + 1, (k * 7) % 5 + 1, k % 3 + 1);
        lines.push_str(&format!("{i} {j} {l} {}\n", 1. + (k % 9) as f32 * 0.5));
    }
    lines
}

#[test]
fn distributed_scores_match_a_single_worker() {
    let path = temp_file("lopsided.tns", &lopsided());
    let full = read_full(&path).unwrap();
    let mut dims = full.dims().to_vec();
    dims[0] = 6;
    let model = FactorModel::alloc(&dims, 3, 11).unwrap();

    let single = Workspace::alloc(&model, NonZeroUsize::MIN).unwrap();
    let expected_rmse = rmse(&full, &model, &single).unwrap();
    let expected_mae = mae(&full, &model, &single).unwrap();

    let scores = run_group(3, |reducer| {
        let layer = Layer::new(6, reducer.rank(), NonZeroUsize::new(3).unwrap());
        let local = read_tensor(&path, &layer).unwrap();

        let mut factors = model.factors().to_vec();
        factors[0] = model.factor(0).slice(s![layer.range.clone(), ..]).to_owned();
        let local_model = FactorModel::from_factors(factors).unwrap();

        let ws = Workspace::alloc(&local_model, NonZeroUsize::MIN)
            .unwrap()
            .with_reducer(Box::new(reducer));

        let empty = local.is_empty();
        let rmse = rmse(&local, &local_model, &ws).unwrap();
        let mae = mae(&local, &local_model, &ws).unwrap();
        (empty, rmse, mae)
    });

    // the last layer owns no entry
    assert!(scores[2].0);
    for (_, rmse, mae) in scores {
        assert!((rmse - expected_rmse).abs() < 1e-12);
        assert!((mae - expected_mae).abs() < 1e-12);
    }
}

/// Training and validation files sharing the extents of `lopsided`.
fn fit_inputs(name: &str) -> (PathBuf, PathBuf) {
    let train_path = temp_file(&format!("{name}-train.tns"), &lopsided());
    let mut validate_lines = String::new();
    for k in 0..15usize {
        let (i, j, l) = ((k * 5) % 6 + 1, k % 5 + 1, (k * 2) % 3 + 1);
        validate_lines.push_str(&format!("{i} {j} {l} {}\n", 2. + (k % 4) as f32 * 0.25));
    }
    let validate_path = temp_file(&format!("{name}-validate.tns"), &validate_lines);
    (train_path, validate_path)
}

/// Trains the `layer` part of a model over 6 mode-0 slices for 3 epochs.
fn fit(
    algorithm: Algorithm,
    (train_path, validate_path): &(PathBuf, PathBuf),
    layer: &Layer,
    reducer: Box<dyn Reducer>,
    configure: impl Fn(&mut Workspace),
) -> (f64, FactorModel) {
    let mut train_t = read_tensor(train_path, layer).unwrap();
    let mut validate = read_tensor(validate_path, layer).unwrap();
    let mut dims = train_t.dims().to_vec();
    for (d, &v) in dims.iter_mut().zip(validate.dims()) {
        *d = (*d).max(v);
    }
    dims[0] = if layer.is_whole() { 6 } else { layer.range.len() };
    train_t.widen_dims(&dims);
    validate.widen_dims(&dims);

    let mut model = FactorModel::alloc_layer(&dims, 2, 5, layer.start()).unwrap();
    let mut ws = Workspace::alloc(&model, NonZeroUsize::new(2).unwrap())
        .unwrap()
        .with_reducer(reducer);
    ws.max_its = 3;
    ws.max_seconds = 0.;
    ws.tolerance = 0.;
    ws.rand_per_iteration = false;
    configure(&mut ws);

    let mut solver = build_solver(algorithm, &train_t, &model, &ws);
    let outcome =
        train(&train_t, &validate, &mut model, &mut ws, solver.as_mut(), |_| {}).unwrap();
    (outcome.best_rmse, model)
}

#[test]
fn distributed_solvers_match_a_single_worker() {
    let inputs = fit_inputs("solvers");

    for algorithm in [
        Algorithm::Gd,
        Algorithm::Nlcg,
        Algorithm::Lbfgs,
        Algorithm::Als,
        Algorithm::Ccd,
    ] {
        let (expected, _) = fit(
            algorithm,
            &inputs,
            &Layer::whole(),
            Box::new(LocalReducer::new()),
            |_| {},
        );
        let distributed = run_group(2, |reducer| {
            let layer = Layer::new(6, reducer.rank(), NonZeroUsize::new(2).unwrap());
            fit(algorithm, &inputs, &layer, Box::new(reducer), |_| {})
        });

        for (rmse, model) in distributed {
            assert!(
                (rmse - expected).abs() < 1e-4,
                "{algorithm}: {rmse} vs {expected}"
            );
            assert!(model.is_finite());
        }
    }
}

#[test]
fn folded_sgd_keeps_the_replicas_in_sync() {
    let inputs = fit_inputs("folds");

    let fits = run_group(2, |reducer| {
        let layer = Layer::new(6, reducer.rank(), NonZeroUsize::new(2).unwrap());
        fit(Algorithm::Sgd, &inputs, &layer, Box::new(reducer), |ws| {
            ws.folds = NonZeroUsize::new(3).unwrap();
            ws.hogwild = false;
            ws.learn_rate = 0.01;
        })
    });

    let (rmse, first) = &fits[0];
    assert!(rmse.is_finite());
    for (other_rmse, other) in &fits[1..] {
        assert_eq!(other_rmse, rmse);
        assert!(other.is_finite());
        // modes 1 and 2 are averaged after every fold
        assert_eq!(other.factor(1), first.factor(1));
        assert_eq!(other.factor(2), first.factor(2));
    }
}
