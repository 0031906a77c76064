//! Reading 10x Genomics feature-barcode matrix directories

use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use log::info;
use scan_types::CountMatrix;
use sprs::TriMat;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Open `dir/name.gz` if it exists, else `dir/name`
fn open_maybe_gz(dir: &Path, name: &str) -> Result<Option<Box<dyn BufRead>>, Error> {
    let gz = dir.join(format!("{name}.gz"));
    if gz.exists() {
        let file = BufReader::new(File::open(&gz).with_context(|| gz.display().to_string())?);
        return Ok(Some(Box::new(BufReader::new(MultiGzDecoder::new(file)))));
    }
    let plain = dir.join(name);
    if plain.exists() {
        let file = File::open(&plain).with_context(|| plain.display().to_string())?;
        return Ok(Some(Box::new(BufReader::new(file))));
    }
    Ok(None)
}

fn require(dir: &Path, name: &str) -> Result<Box<dyn BufRead>, Error> {
    open_maybe_gz(dir, name)?.ok_or_else(|| format_err!("{} not found (plain or gzipped)", dir.join(name).display()))
}

/// Gene ids and names from `features.tsv` (id, name, type) or legacy `genes.tsv` (id, name)
fn read_features(dir: &Path) -> Result<(Vec<String>, Vec<String>), Error> {
    let reader = match open_maybe_gz(dir, "features.tsv")? {
        Some(r) => r,
        None => require(dir, "genes.tsv")?,
    };
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let id = fields.next().ok_or_else(|| format_err!("features line {}: no id", i + 1))?;
        let name = fields.next().unwrap_or(id);
        ids.push(id.to_string());
        names.push(name.to_string());
    }
    Ok((ids, names))
}

fn read_barcodes(dir: &Path) -> Result<Vec<String>, Error> {
    let mut barcodes = Vec::new();
    for line in require(dir, "barcodes.tsv")?.lines() {
        let line = line?;
        if !line.is_empty() {
            barcodes.push(line.trim_end().to_string());
        }
    }
    Ok(barcodes)
}

/// Parse a MatrixMarket coordinate file of integer counts
fn read_mtx(reader: Box<dyn BufRead>) -> Result<TriMat<u32>, Error> {
    let mut mat: Option<TriMat<u32>> = None;
    for line in reader.lines() {
        let line = line?;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<u32>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!("entry ({row}, {col}) outside a {} x {} matrix", m.rows(), m.cols());
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
    }
    mat.ok_or_else(|| format_err!("no matrix found"))
}

/// Load a 10x matrix directory: `features.tsv` (or `genes.tsv`), `barcodes.tsv` and
/// `matrix.mtx`, each optionally gzipped.
pub fn read_10x_dir(dir: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let dir = dir.as_ref();
    let (gene_ids, gene_names) = read_features(dir)?;
    let barcodes = read_barcodes(dir)?;
    let tri = read_mtx(require(dir, "matrix.mtx")?).with_context(|| dir.join("matrix.mtx").display().to_string())?;
    if tri.rows() != gene_ids.len() || tri.cols() != barcodes.len() {
        bail!(
            "{}: matrix is {} x {} but there are {} features and {} barcodes",
            dir.display(),
            tri.rows(),
            tri.cols(),
            gene_ids.len(),
            barcodes.len()
        );
    }

    let matrix = CountMatrix::new(gene_ids, gene_names, barcodes, tri.to_csc())?;
    info!(
        "read {} genes x {} cells from {}",
        matrix.n_genes(),
        matrix.n_cells(),
        dir.display()
    );
    Ok(matrix)
}

/// Directory of a 10x matrix, accepting either the directory or its `matrix.mtx(.gz)`
pub fn matrix_dir(path: &Path) -> PathBuf {
    if path.is_file() {
        path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    } else {
        path.to_path_buf()
    }
}
