use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use log::debug;
use ndarray::ArrayView2;
use partition::Layer;

use crate::{CompletionErr, MAX_MODES, Result, SparseTensor};

/// What the first pass over a tensor file learns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// The global extent of every mode.
    pub dims: Vec<usize>,
    /// The amount of entries inside the layer.
    pub nnz: usize,
}

/// Calls `f` with the 1-based line number and the content of every data line.
///
/// Empty lines and lines starting with `#` are skipped.
fn for_each_record<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(usize, &str) -> Result<()>,
{
    let io_err = |source| CompletionErr::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut lineno = 0;

    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(io_err)? == 0 {
            return Ok(());
        }
        lineno += 1;

        let content = line.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        f(lineno, content)?;
    }
}

/// Parses one data line into 0-based indices and a value.
fn parse_record(
    path: &Path,
    lineno: usize,
    content: &str,
    nmodes: usize,
    ind: &mut [usize],
) -> Result<f32> {
    let malformed = |reason| CompletionErr::Malformed {
        path: path.to_path_buf(),
        line: lineno,
        reason,
    };

    let mut fields = content.split_whitespace();

    for slot in ind.iter_mut().take(nmodes) {
        let field = fields.next().ok_or_else(|| malformed("wrong field count"))?;
        let index: usize = field.parse().map_err(|_| malformed("unreadable index"))?;
        if index == 0 {
            return Err(malformed("indices are 1-based"));
        }
        *slot = index - 1;
    }

    let field = fields.next().ok_or_else(|| malformed("wrong field count"))?;
    let val: f32 = field.parse().map_err(|_| malformed("unreadable value"))?;

    if fields.next().is_some() {
        return Err(malformed("wrong field count"));
    }

    Ok(val)
}

/// The amount of modes, taken from the first data line.
fn count_modes(path: &Path) -> Result<usize> {
    let io_err = |source| CompletionErr::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_err)?;
        let content = line.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        let nmodes = content.split_whitespace().count().saturating_sub(1);
        if !(2..=MAX_MODES).contains(&nmodes) {
            return Err(CompletionErr::ModeCount { got: nmodes });
        }
        return Ok(nmodes);
    }

    Err(CompletionErr::Malformed {
        path: path.to_path_buf(),
        line: 0,
        reason: "no entries",
    })
}

/// First pass: global extents of every mode and the amount of entries in `layer`.
///
/// # Arguments
/// * `path` - The tensor file.
/// * `layer` - The mode-0 layer owned by this worker.
pub fn scan_layout(path: &Path, layer: &Layer) -> Result<FileLayout> {
    let nmodes = count_modes(path)?;
    let mut dims = vec![0; nmodes];
    let mut ind = vec![0; nmodes];
    let mut nnz = 0;

    for_each_record(path, |lineno, content| {
        parse_record(path, lineno, content, nmodes, &mut ind)?;

        for (extent, &i) in dims.iter_mut().zip(&ind) {
            *extent = (*extent).max(i + 1);
        }

        if layer.contains(ind[0]) {
            nnz += 1;
        }
        Ok(())
    })?;

    Ok(FileLayout { dims, nnz })
}

/// Reads the entries of a tensor file that belong to `layer`.
///
/// Mode-0 indices are rebased to the start of the layer and the mode-0 extent
/// becomes the layer's extent, every other mode keeps its global extent.
///
/// # Arguments
/// * `path` - The tensor file.
/// * `layer` - The mode-0 layer owned by this worker.
///
/// # Returns
/// The local tensor, or a `BadInput` class error if the file is unreadable or malformed.
pub fn read_tensor(path: &Path, layer: &Layer) -> Result<SparseTensor> {
    let FileLayout { mut dims, nnz } = scan_layout(path, layer)?;
    let nmodes = dims.len();

    let mut inds = vec![Vec::with_capacity(nnz); nmodes];
    let mut vals = Vec::with_capacity(nnz);
    let mut ind = vec![0; nmodes];

    for_each_record(path, |lineno, content| {
        let val = parse_record(path, lineno, content, nmodes, &mut ind)?;

        if !layer.contains(ind[0]) {
            return Ok(());
        }

        inds[0].push(ind[0] - layer.start());
        for m in 1..nmodes {
            inds[m].push(ind[m]);
        }
        vals.push(val);
        Ok(())
    })?;

    if !layer.is_whole() {
        dims[0] = layer.range.len();
    }

    debug!(nnz = vals.len(), rank = layer.rank; "read tensor {}", path.display());

    SparseTensor::new(dims, inds, vals)
}

/// Reads a whole tensor file.
pub fn read_full(path: &Path) -> Result<SparseTensor> {
    read_tensor(path, &Layer::whole())
}

/// Returns the global extent of `mode` in a tensor file.
pub fn scan_extent(path: &Path, mode: usize) -> Result<usize> {
    let layout = scan_layout(path, &Layer::whole())?;
    layout
        .dims
        .get(mode)
        .copied()
        .ok_or(CompletionErr::ModeCount {
            got: layout.dims.len(),
        })
}

/// Writes a dense row-major matrix: a `rows cols` header followed by one line per row.
pub fn write_matrix(path: &Path, mat: ArrayView2<f32>) -> Result<()> {
    let io_err = |source| CompletionErr::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{} {}", mat.nrows(), mat.ncols()).map_err(io_err)?;
    for row in mat.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{v:.6e}")).collect();
        writeln!(out, "{}", line.join(" ")).map_err(io_err)?;
    }

    out.flush().map_err(io_err)
}
