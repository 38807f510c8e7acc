use std::{
    env, fs,
    path::{Path, PathBuf},
    process,
};

use completion::{Algorithm, CompletionConfig};
use tensor_completion::{Inputs, Settings, exit_status, launch};

fn temp_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("complete-{}-{name}", process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A 3-mode tensor of extents (6, 5, 3) with `nnz` entries.
fn tensor(nnz: usize, shift: usize) -> String {
    let mut lines = String::from("# i j k value\n");
    for k in 0..nnz {
        let n = k + shift;
        let (i, j, l) = (n % 6 + 1, (n * 7) % 5 + 1, n % 3 + 1);
        lines.push_str(&format!("{i} {j} {l} {}\n", 1. + (n % 7) as f32 * 0.5));
    }
    lines
}

fn inputs(dir: &Path, test: bool) -> Inputs {
    fs::write(dir.join("train.tns"), tensor(60, 0)).unwrap();
    fs::write(dir.join("validate.tns"), tensor(12, 3)).unwrap();
    if test {
        fs::write(dir.join("test.tns"), tensor(9, 5)).unwrap();
    }

    Inputs {
        train: dir.join("train.tns"),
        validate: dir.join("validate.tns"),
        test: test.then(|| dir.join("test.tns")),
        output: dir.join("out"),
    }
}

fn config(algorithm: Algorithm, workers: usize) -> CompletionConfig {
    CompletionConfig {
        algorithm: Some(algorithm),
        rank: Some(2),
        nthreads: Some(2),
        workers: Some(workers),
        max_its: Some(3),
        seed: Some(17),
        write: Some(true),
        ..Default::default()
    }
}

fn header(path: &Path) -> (usize, usize) {
    let content = fs::read_to_string(path).unwrap();
    let mut fields = content.lines().next().unwrap().split_whitespace();
    let rows = fields.next().unwrap().parse().unwrap();
    let cols = fields.next().unwrap().parse().unwrap();
    (rows, cols)
}

#[test]
fn a_single_worker_writes_every_mode() {
    let dir = temp_dir("single");
    let inputs = inputs(&dir, true);
    let settings = Settings::resolve(config(Algorithm::Als, 1));

    let summary = launch::run(&inputs, &settings).unwrap();

    assert!(summary.outcome.epochs <= 3);
    assert!(summary.validate.rmse.is_finite());
    assert_eq!(summary.validate.nnz, 12);
    assert_eq!(summary.test.unwrap().nnz, 9);

    let out = dir.join("out");
    assert_eq!(summary.written.len(), 3);
    assert_eq!(header(&out.join("mode1.mat")), (6, 2));
    assert_eq!(header(&out.join("mode2.mat")), (5, 2));
    assert_eq!(header(&out.join("mode3.mat")), (3, 2));
}

#[test]
fn workers_write_their_own_slices() {
    let dir = temp_dir("group");
    let inputs = inputs(&dir, false);
    let settings = Settings::resolve(config(Algorithm::Ccd, 2));

    let summary = launch::run(&inputs, &settings).unwrap();

    assert_eq!(summary.validate.nnz, 12);
    assert_eq!(summary.written.len(), 3);

    let out = dir.join("out");
    let (rows0, _) = header(&out.join("mode1.part0.mat"));
    let (rows1, _) = header(&out.join("mode1.part1.mat"));
    assert_eq!(rows0 + rows1, 6);
    assert_eq!(header(&out.join("mode2.mat")), (5, 2));
    assert!(!out.join("mode1.mat").exists());
}

#[test]
fn splitting_mode_zero_keeps_the_deterministic_solvers_exact() {
    let dir = temp_dir("split");
    let inputs = inputs(&dir, false);

    for algorithm in [Algorithm::Gd, Algorithm::Nlcg, Algorithm::Lbfgs, Algorithm::Ccd] {
        let run = |workers| {
            let settings = Settings::resolve(CompletionConfig {
                rand_per_iteration: Some(false),
                hogwild: Some(false),
                write: Some(false),
                ..config(algorithm, workers)
            });
            launch::run(&inputs, &settings).unwrap()
        };

        let single = run(1);
        let split = run(2);
        assert!(
            (single.outcome.best_rmse - split.outcome.best_rmse).abs() < 1e-4,
            "{algorithm}: {} vs {}",
            single.outcome.best_rmse,
            split.outcome.best_rmse
        );
    }
}

#[test]
fn nothing_is_written_by_default() {
    let dir = temp_dir("nowrite");
    let inputs = inputs(&dir, false);
    let settings = Settings::resolve(CompletionConfig {
        write: None,
        ..config(Algorithm::Sgd, 1)
    });

    let summary = launch::run(&inputs, &settings).unwrap();

    assert!(summary.written.is_empty());
    assert!(!dir.join("out").exists());
}

#[test]
fn missing_files_are_bad_input() {
    let dir = temp_dir("missing");
    let mut inputs = inputs(&dir, false);
    inputs.validate = dir.join("nope.tns");

    for workers in [1, 2] {
        let err = launch::run(&inputs, &Settings::resolve(config(Algorithm::Gd, workers)))
            .unwrap_err();
        assert_eq!(exit_status(&err), 2, "{workers} workers: {err:#}");
    }
}

#[test]
fn mismatched_mode_counts_abort_every_worker() {
    let dir = temp_dir("modes");
    let inputs = inputs(&dir, false);
    fs::write(&inputs.validate, "1 1 2.0\n2 3 1.0\n").unwrap();

    let err = launch::run(&inputs, &Settings::resolve(config(Algorithm::Als, 2))).unwrap_err();
    assert_eq!(exit_status(&err), 2, "{err:#}");
}

#[test]
fn an_empty_slice_is_an_allocation_failure() {
    let dir = temp_dir("empty-slice");
    let inputs = inputs(&dir, false);

    // 6 slices of mode 0 can't feed 8 workers
    let err = launch::run(&inputs, &Settings::resolve(config(Algorithm::Sgd, 8))).unwrap_err();
    assert_eq!(exit_status(&err), 3, "{err:#}");
}

#[test]
fn a_zero_rank_is_an_allocation_failure() {
    let dir = temp_dir("zero-rank");
    let inputs = inputs(&dir, false);
    let settings = Settings::resolve(CompletionConfig {
        rank: Some(0),
        ..config(Algorithm::Lbfgs, 1)
    });

    let err = launch::run(&inputs, &settings).unwrap_err();
    assert_eq!(exit_status(&err), 3);
}
