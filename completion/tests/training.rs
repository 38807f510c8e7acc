use std::num::NonZeroUsize;

use completion::{
    Algorithm, FactorModel, SparseTensor, StopReason, Verdict, Workspace, build_solver,
    eval::{mae, rmse},
    train::train,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn random_tensor(dims: &[usize], nnz: usize, seed: u64) -> SparseTensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let entries: Vec<_> = (0..nnz)
        .map(|_| {
            let coords: Vec<usize> = dims.iter().map(|&d| rng.random_range(0..d)).collect();
            (coords, rng.random_range(1.0f32..5.0))
        })
        .collect();

    let mut tensor = SparseTensor::from_entries(dims.len(), entries).unwrap();
    tensor.widen_dims(dims);
    tensor
}

fn workspace(model: &FactorModel, nthreads: usize) -> Workspace {
    Workspace::alloc(model, NonZeroUsize::new(nthreads).unwrap()).unwrap()
}

struct Run {
    model: FactorModel,
    best: FactorModel,
    best_rmse: f64,
    best_epoch: usize,
    reason: StopReason,
    epochs: usize,
}

fn run(
    algorithm: Algorithm,
    train_t: &SparseTensor,
    validate: &SparseTensor,
    rank: usize,
    configure: impl Fn(&mut Workspace),
) -> Run {
    let mut model = FactorModel::for_tensor(train_t, rank, 42).unwrap();
    let mut ws = workspace(&model, 2);
    ws.seed = 42;
    configure(&mut ws);

    let mut solver = build_solver(algorithm, train_t, &model, &ws);
    let outcome = train(train_t, validate, &mut model, &mut ws, solver.as_mut(), |_| {}).unwrap();

    Run {
        model,
        best: ws.take_best().unwrap().model,
        best_rmse: outcome.best_rmse,
        best_epoch: outcome.best_epoch,
        reason: outcome.reason,
        epochs: outcome.epochs,
    }
}

#[test]
fn seeded_sgd_runs_are_bit_identical() {
    let train_t = random_tensor(&[4, 4, 4], 10, 1);
    let validate = random_tensor(&[4, 4, 4], 6, 2);

    let configure = |ws: &mut Workspace| {
        ws.max_its = 50;
        ws.tolerance = 0.;
        ws.hogwild = false;
        ws.rand_per_iteration = false;
    };

    let a = run(Algorithm::Sgd, &train_t, &validate, 2, configure);
    let b = run(Algorithm::Sgd, &train_t, &validate, 2, configure);

    assert_eq!(a.model, b.model);
    assert_eq!(a.best, b.best);
    assert_eq!(a.best_rmse.to_bits(), b.best_rmse.to_bits());
    assert_eq!(a.best_epoch, b.best_epoch);
}

#[test]
fn initial_scores_are_finite_and_non_negative() {
    let t = random_tensor(&[7, 5, 3], 50, 3);
    let model = FactorModel::for_tensor(&t, 4, 9).unwrap();
    let ws = workspace(&model, 3);

    let score = rmse(&t, &model, &ws).unwrap();
    assert!(score.is_finite() && score >= 0.);
    let score = mae(&t, &model, &ws).unwrap();
    assert!(score.is_finite() && score >= 0.);
}

#[test]
fn clones_score_bit_identically() {
    let t = random_tensor(&[6, 6], 30, 4);
    let model = FactorModel::for_tensor(&t, 3, 5).unwrap();
    let ws = workspace(&model, 2);

    let original = rmse(&t, &model, &ws).unwrap();
    let clone = model.clone();
    drop(model);

    assert_eq!(rmse(&t, &clone, &ws).unwrap().to_bits(), original.to_bits());
}

#[test]
fn every_algorithm_halts_within_max_its() {
    let train_t = random_tensor(&[8, 6, 5], 120, 5);
    let validate = random_tensor(&[8, 6, 5], 30, 6);

    for algorithm in Algorithm::ALL {
        let result = run(algorithm, &train_t, &validate, 3, |ws| {
            ws.max_its = 7;
            ws.max_seconds = 0.;
            ws.tolerance = 0.;
        });

        assert!(result.epochs <= 7, "{algorithm} ran {} epochs", result.epochs);
        assert!(result.best_epoch <= result.epochs);
        assert!(result.best.is_finite(), "{algorithm} kept a non finite model");
        if result.reason == StopReason::MaxIters {
            assert_eq!(result.epochs, 7);
        }
    }
}

#[test]
fn best_score_never_increases() {
    let train_t = random_tensor(&[10, 8, 6], 200, 7);
    let validate = random_tensor(&[10, 8, 6], 40, 8);
    let mut model = FactorModel::for_tensor(&train_t, 4, 1).unwrap();
    let mut ws = workspace(&model, 2);
    ws.seed = 3;
    ws.max_its = 25;
    ws.learn_rate = 0.005;

    let mut solver = build_solver(Algorithm::Sgd, &train_t, &model, &ws);
    let mut best = f64::INFINITY;
    let mut best_epoch = 0;
    let outcome = train(&train_t, &validate, &mut model, &mut ws, solver.as_mut(), |report| {
        match report.verdict {
            Verdict::Improved => {
                assert!(report.validate_rmse < best);
                best = report.validate_rmse;
                best_epoch = report.epoch;
            }
            Verdict::Stalled => assert!(report.validate_rmse >= best - 1e-4),
        }
    })
    .unwrap();

    assert_eq!(outcome.best_rmse, best);
    assert_eq!(outcome.best_epoch, best_epoch);
}

#[test]
fn als_fits_the_training_set() {
    let t = random_tensor(&[6, 5, 4], 60, 9);
    let result = run(Algorithm::Als, &t, &t, 4, |ws| {
        ws.max_its = 20;
        ws.regularization.fill(1e-3);
    });

    let model = FactorModel::for_tensor(&t, 4, 42).unwrap();
    let ws = workspace(&model, 1);
    assert!(result.best_rmse < rmse(&t, &model, &ws).unwrap());
}

#[test]
fn rank_one_runs_stay_finite() {
    let train_t = random_tensor(&[5, 4, 3], 30, 10);
    let validate = random_tensor(&[5, 4, 3], 10, 11);

    for algorithm in Algorithm::ALL {
        let result = run(algorithm, &train_t, &validate, 1, |ws| ws.max_its = 5);

        assert!(result.best.is_finite(), "{algorithm}");
        assert!(result.best_rmse.is_finite(), "{algorithm}");
        assert_eq!(result.best.rank(), 1);
    }
}
