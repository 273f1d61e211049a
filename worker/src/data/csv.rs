use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::debug;

use super::Dataset;
use crate::{Result, WorkerErr};

/// Loads a comma separated dataset, one instance per line with its features followed by its labels.
///
/// # Arguments
/// * `path` - The location of the dataset.
/// * `width` - The amount of values every line must have.
pub fn load_csv<P: AsRef<Path>>(path: P, width: usize) -> Result<Dataset> {
    let file = File::open(path.as_ref())?;
    let dataset = parse_csv(BufReader::new(file), width)?;

    debug!(
        "loaded {} instances from {}",
        dataset.len(),
        path.as_ref().display()
    );
    Ok(dataset)
}

/// Parses a comma separated dataset, blank lines and lines starting with `#` are skipped.
pub fn parse_csv<R: BufRead>(reader: R, width: usize) -> Result<Dataset> {
    let mut data = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let before = data.len();
        for field in line.split(',') {
            let value = field.trim().parse::<f32>().map_err(|e| WorkerErr::Data {
                line: i + 1,
                detail: format!("{field:?}: {e}"),
            })?;
            data.push(value);
        }

        let got = data.len() - before;
        if got != width {
            return Err(WorkerErr::Data {
                line: i + 1,
                detail: format!("expected {width} values, got {got}"),
            });
        }
    }

    Dataset::new(data, width)
}
