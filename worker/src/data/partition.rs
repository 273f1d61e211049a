use std::{ops::Range, sync::Arc};

use crate::{Result, WorkerErr};

/// A source of training instances that can be read again from the start.
pub trait InstanceSource {
    /// Reads the next instance into `out`.
    ///
    /// # Returns
    /// `false` once the end of the source was reached, `out` is left untouched then.
    fn read_next(&mut self, out: &mut Vec<f32>) -> bool;

    /// Rewinds the source to its first instance.
    fn reopen(&mut self);

    /// Reads the next instance, wrapping around to the start when the end is reached.
    ///
    /// # Returns
    /// `WorkerErr::EmptyPartition` if the source has no instances at all.
    fn read_cyclic(&mut self, out: &mut Vec<f32>) -> Result<()> {
        if self.read_next(out) {
            return Ok(());
        }

        self.reopen();
        if self.read_next(out) {
            Ok(())
        } else {
            Err(WorkerErr::EmptyPartition)
        }
    }
}

/// Fixed width instances kept in memory, each one is its features followed by its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    data: Vec<f32>,
    width: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `data` - The instances laid out one after the other.
    /// * `width` - The amount of values of a single instance.
    pub fn new(data: Vec<f32>, width: usize) -> Result<Self> {
        if width == 0 || data.len() % width != 0 {
            return Err(WorkerErr::Data {
                line: 0,
                detail: format!("{} values can't be split into rows of {width}", data.len()),
            });
        }

        Ok(Self { data, width })
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn instance(&self, idx: usize) -> &[f32] {
        let start = idx * self.width;
        &self.data[start..start + self.width]
    }
}

/// A contiguous slice of a shared dataset, read cyclically by a single worker.
#[derive(Debug, Clone)]
pub struct Partition {
    dataset: Arc<Dataset>,
    range: Range<usize>,
    cursor: usize,
}

impl Partition {
    /// Creates a new `Partition`.
    ///
    /// # Arguments
    /// * `dataset` - The shared dataset.
    /// * `range` - The instances of the dataset belonging to this partition, clamped to its size.
    pub fn new(dataset: Arc<Dataset>, range: Range<usize>) -> Self {
        let end = range.end.min(dataset.len());
        let range = range.start.min(end)..end;

        Self {
            cursor: range.start,
            dataset,
            range,
        }
    }

    /// A partition holding the whole dataset.
    pub fn whole(dataset: Arc<Dataset>) -> Self {
        let range = 0..dataset.len();
        Self::new(dataset, range)
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl InstanceSource for Partition {
    fn read_next(&mut self, out: &mut Vec<f32>) -> bool {
        if self.cursor >= self.range.end {
            return false;
        }

        out.clear();
        out.extend_from_slice(self.dataset.instance(self.cursor));
        self.cursor += 1;
        true
    }

    fn reopen(&mut self) {
        self.cursor = self.range.start;
    }
}
