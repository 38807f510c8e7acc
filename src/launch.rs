use std::{
    fs,
    num::NonZeroUsize,
    panic,
    path::{Path, PathBuf},
    thread,
};

use anyhow::Context;
use completion::{
    Algorithm, CompletionConfig, CompletionErr, FactorModel, Outcome, Scores,
    SparseTensor, Workspace, build_solver, clock_seed, default_threads,
    eval::scores,
    io::{read_tensor, scan_extent, write_matrix},
    train::train,
};
use log::{debug, info};
use partition::{GroupReducer, Layer, LocalReducer, ReduceErr, Reducer};

use crate::report;

pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::Sgd;
pub const DEFAULT_RANK: usize = 10;

/// The files a run reads and the directory its artifacts go to.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub train: PathBuf,
    pub validate: PathBuf,
    pub test: Option<PathBuf>,
    pub output: PathBuf,
}

/// A configuration with every launch level default resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub algorithm: Algorithm,
    pub rank: usize,
    pub nthreads: NonZeroUsize,
    pub workers: NonZeroUsize,
    pub seed: u64,
    pub write: bool,
    /// Applied to every worker's workspace, the seed is always set.
    pub config: CompletionConfig,
}

impl Settings {
    /// Fills in the defaults of `config`.
    ///
    /// A missing seed is drawn from the clock once, so every worker of the run
    /// shares it.
    pub fn resolve(config: CompletionConfig) -> Self {
        let seed = config.seed.unwrap_or_else(clock_seed);
        let nthreads = config
            .nthreads
            .and_then(NonZeroUsize::new)
            .unwrap_or_else(default_threads);

        Self {
            algorithm: config.algorithm.unwrap_or(DEFAULT_ALGORITHM),
            rank: config.rank.unwrap_or(DEFAULT_RANK),
            nthreads,
            workers: config
                .workers
                .and_then(NonZeroUsize::new)
                .unwrap_or(NonZeroUsize::MIN),
            seed,
            write: config.write.unwrap_or(false),
            config: CompletionConfig {
                seed: Some(seed),
                nthreads: Some(nthreads.get()),
                ..config
            },
        }
    }
}

/// What a finished run produced, as seen by one worker.
#[derive(Debug, Clone)]
pub struct Summary {
    pub outcome: Outcome,
    /// Scores of the best model on the validation tensor.
    pub validate: Scores,
    pub test: Option<Scores>,
    pub written: Vec<PathBuf>,
}

/// The local parts of the input tensors, sized after each other.
struct Tensors {
    train: SparseTensor,
    validate: SparseTensor,
    test: Option<SparseTensor>,
    dims: Vec<usize>,
}

/// Trains a model on `inputs` with `settings`.
///
/// Every worker runs on its own thread with its own slice of mode 0, the
/// workers only meet in the reductions. Worker 0 prints the console report.
///
/// # Returns
/// Worker 0's summary, or the error that made the run fail.
pub fn run(inputs: &Inputs, settings: &Settings) -> anyhow::Result<Summary> {
    if settings.write {
        fs::create_dir_all(&inputs.output).with_context(|| {
            format!("failed to create '{}'", inputs.output.display())
        })?;
    }

    if let Ok(json) = serde_json::to_string(&settings.config) {
        debug!("effective config {json}");
    }

    let npes = settings.workers;
    info!(
        algorithm = settings.algorithm.name(), rank = settings.rank,
        workers = npes.get(), nthreads = settings.nthreads.get(), seed = settings.seed;
        "launching"
    );

    let results = if npes.get() == 1 {
        let reducer = Box::new(LocalReducer::new());
        vec![run_worker(inputs, settings, Layer::whole(), reducer)]
    } else {
        let total = mode0_extent(inputs).context("failed to scan the inputs")?;
        let group = GroupReducer::group(npes);

        thread::scope(|s| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|reducer| {
                    let layer = Layer::new(total, reducer.rank(), npes);
                    s.spawn(move || run_worker(inputs, settings, layer, Box::new(reducer)))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        })
    };

    Ok(first_failure(results)?)
}

/// The extent of mode 0 across every input file.
fn mode0_extent(inputs: &Inputs) -> completion::Result<usize> {
    let mut total = scan_extent(&inputs.train, 0)?.max(scan_extent(&inputs.validate, 0)?);
    if let Some(test) = &inputs.test {
        total = total.max(scan_extent(test, 0)?);
    }
    Ok(total)
}

/// Returns worker 0's summary, or the error that started a failure.
///
/// Workers abandoning the run because a peer failed report a secondary error,
/// the first primary one is the cause.
fn first_failure(results: Vec<completion::Result<Summary>>) -> completion::Result<Summary> {
    let (summaries, mut errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);

    if !errors.is_empty() {
        let cause = errors
            .iter()
            .position(|e| !matches!(e, Err(err) if is_secondary(err)))
            .unwrap_or(0);
        return errors.swap_remove(cause);
    }

    summaries
        .into_iter()
        .next()
        .unwrap_or(Err(CompletionErr::PeerFailed))
}

fn is_secondary(err: &CompletionErr) -> bool {
    matches!(
        err,
        CompletionErr::PeerFailed | CompletionErr::Reduction(ReduceErr::GroupClosed { .. })
    )
}

/// Fails every worker of the group when `result` failed on any of them.
fn agree<T>(reducer: &dyn Reducer, result: completion::Result<T>) -> completion::Result<T> {
    let failed = reducer.sum(f64::from(u8::from(result.is_err())));
    let value = result?;

    if failed? > 0. {
        return Err(CompletionErr::PeerFailed);
    }
    Ok(value)
}

fn load(inputs: &Inputs, layer: &Layer) -> completion::Result<Tensors> {
    let mut train = read_tensor(&inputs.train, layer)?;
    let mut validate = read_tensor(&inputs.validate, layer)?;
    let mut test = inputs
        .test
        .as_deref()
        .map(|path| read_tensor(path, layer))
        .transpose()?;

    // Validation and test entries may address rows the training set never uses.
    let mut dims = train.dims().to_vec();
    for other in [Some(&validate), test.as_ref()].into_iter().flatten() {
        if other.nmodes() != dims.len() {
            return Err(CompletionErr::SizeMismatch {
                a: "tensor modes",
                b: "training modes",
                got: other.nmodes(),
                expected: dims.len(),
            });
        }
        for (extent, &e) in dims.iter_mut().zip(other.dims()) {
            *extent = (*extent).max(e);
        }
    }

    train.widen_dims(&dims);
    validate.widen_dims(&dims);
    if let Some(test) = test.as_mut() {
        test.widen_dims(&dims);
    }

    Ok(Tensors {
        train,
        validate,
        test,
        dims,
    })
}

fn workspace(model: &FactorModel, settings: &Settings) -> completion::Result<Workspace> {
    let mut ws = Workspace::alloc(model, settings.nthreads)?;
    ws.apply(&settings.config)?;
    Ok(ws)
}

fn run_worker(
    inputs: &Inputs,
    settings: &Settings,
    layer: Layer,
    reducer: Box<dyn Reducer>,
) -> completion::Result<Summary> {
    let root = reducer.is_root();

    let Tensors {
        train: train_t,
        validate,
        test,
        dims,
    } = agree(reducer.as_ref(), load(inputs, &layer))?;

    let mut model = agree(
        reducer.as_ref(),
        FactorModel::alloc_layer(&dims, settings.rank, settings.seed, layer.start()),
    )?;
    let mut ws = agree(reducer.as_ref(), workspace(&model, settings))?.with_reducer(reducer);

    let mut nnz = [
        train_t.nnz() as f64,
        validate.nnz() as f64,
        test.as_ref().map_or(0., |t| t.nnz() as f64),
    ];
    ws.reducer().sum_into(&mut nnz)?;

    if root {
        let nnz = nnz.map(|n| n as usize);
        println!("{}", report::header(inputs, settings, &ws, nnz));
    }

    let mut solver = build_solver(settings.algorithm, &train_t, &model, &ws);
    let outcome = train(&train_t, &validate, &mut model, &mut ws, solver.as_mut(), |r| {
        if root {
            println!("{}", report::epoch_line(r));
        }
    })?;

    let best = ws.take_best().map_or(model, |b| b.model);
    let validate_scores = scores(&validate, &best, &ws)?;
    let test_scores = test
        .as_ref()
        .map(|t| scores(t, &best, &ws))
        .transpose()?;

    let written = if settings.write {
        write_factors(&inputs.output, &best, ws.reducer())?
    } else {
        Vec::new()
    };

    Ok(Summary {
        outcome,
        validate: validate_scores,
        test: test_scores,
        written,
    })
}

/// Writes one matrix file per mode of `model` into `dir`.
///
/// Alone, a worker writes `mode<m>.mat` for every mode. In a group, every
/// worker writes its mode-0 slice as `mode1.part<rank>.mat` and worker 0
/// writes the replicated modes.
///
/// # Returns
/// The written paths.
pub fn write_factors(
    dir: &Path,
    model: &FactorModel,
    reducer: &dyn Reducer,
) -> completion::Result<Vec<PathBuf>> {
    let distributed = reducer.npes() > 1;
    let mut written = Vec::new();

    for (mode, factor) in model.factors().iter().enumerate() {
        let name = match mode {
            0 if distributed => format!("mode1.part{}.mat", reducer.rank()),
            _ if distributed && !reducer.is_root() => continue,
            _ => format!("mode{}.mat", mode + 1),
        };

        let path = dir.join(name);
        write_matrix(&path, factor.view())?;
        debug!(mode = mode, rows = factor.nrows(); "wrote {}", path.display());
        written.push(path);
    }

    Ok(written)
}

/// Exit status of a run that failed with `err`: 2 for bad input, 3 when the
/// model couldn't be allocated, 1 otherwise.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CompletionErr>() {
            return if e.is_bad_input() {
                2
            } else if e.is_allocation() {
                3
            } else {
                1
            };
        }
        if cause.is::<std::io::Error>() || cause.is::<serde_json::Error>() {
            return 2;
        }
    }
    1
}
