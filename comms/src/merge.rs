//! The payload of the single remote operation, `merge`.
//!
//! Layout after the message kind header, every word is a big endian `u32`:
//! `average_error bits | converged | n | (rows, cols) * n | (rows, cols) * n`,
//! followed by the `f32` data of the `n` matrices and then of the `n` previous deltas,
//! row major, in native byte order.

use std::io;

use ndarray::Array2;

type Word = u32;
const WORD_SIZE: usize = size_of::<Word>();

/// The bidirectional protocol payload between slaves and the merge service.
///
/// As a request it carries the slave's averaged gradient and its stale copy of the previous
/// deltas, as a response it carries the canonical weights, the deltas last applied to them and
/// the convergence flag.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeMessage {
    pub average_error: f32,
    pub converged: bool,
    pub matrices: Vec<Array2<f32>>,
    pub previous_deltas: Vec<Array2<f32>>,
}

impl MergeMessage {
    /// Creates a new merge request, slaves never claim convergence.
    ///
    /// # Arguments
    /// * `average_error` - The mean training error of the batch.
    /// * `matrices` - The averaged weight updates of the batch.
    /// * `previous_deltas` - The slave's copy of the previously applied deltas.
    ///
    /// # Returns
    /// A new `MergeMessage` instance.
    pub fn request(
        average_error: f32,
        matrices: Vec<Array2<f32>>,
        previous_deltas: Vec<Array2<f32>>,
    ) -> Self {
        Self {
            average_error,
            converged: false,
            matrices,
            previous_deltas,
        }
    }

    /// Creates a new merge response.
    ///
    /// # Arguments
    /// * `converged` - Whether the service considers the training finished.
    /// * `matrices` - A snapshot of the canonical weights.
    /// * `previous_deltas` - A snapshot of the last applied deltas.
    ///
    /// # Returns
    /// A new `MergeMessage` instance.
    pub fn response(
        converged: bool,
        matrices: Vec<Array2<f32>>,
        previous_deltas: Vec<Array2<f32>>,
    ) -> Self {
        Self {
            average_error: 0.,
            converged,
            matrices,
            previous_deltas,
        }
    }

    /// Appends the encoded message to `buf`.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        if self.matrices.len() != self.previous_deltas.len() {
            return Err(invalid(format!(
                "got {} matrices but {} previous deltas",
                self.matrices.len(),
                self.previous_deltas.len()
            )));
        }

        let n = to_word(self.matrices.len())?;
        put_word(buf, self.average_error.to_bits());
        put_word(buf, self.converged as Word);
        put_word(buf, n);

        for m in self.matrices.iter().chain(&self.previous_deltas) {
            let (rows, cols) = m.dim();
            put_word(buf, to_word(rows)?);
            put_word(buf, to_word(cols)?);
        }

        for m in self.matrices.iter().chain(&self.previous_deltas) {
            match m.as_slice() {
                Some(data) => buf.extend_from_slice(bytemuck::cast_slice(data)),
                None => m.iter().for_each(|x| buf.extend_from_slice(&x.to_ne_bytes())),
            }
        }

        Ok(())
    }

    /// Decodes a message previously written by `encode`.
    pub(crate) fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut words = WordReader { buf };

        let average_error = f32::from_bits(words.next()?);
        let converged = match words.next()? {
            0 => false,
            1 => true,
            other => return Err(invalid(format!("invalid converged flag {other}"))),
        };

        let n = words.next()? as usize;
        let mut dims = Vec::with_capacity(n.min(buf.len() / WORD_SIZE) * 2);
        for _ in 0..2 * n {
            let rows = words.next()? as usize;
            let cols = words.next()? as usize;
            dims.push((rows, cols));
        }

        let mut data = words.buf;
        let mut matrices = Vec::with_capacity(dims.len());

        for (rows, cols) in dims {
            let len = rows
                .checked_mul(cols)
                .and_then(|len| len.checked_mul(size_of::<f32>()))
                .ok_or_else(|| invalid(format!("matrix of {rows}x{cols} overflows")))?;

            if data.len() < len {
                return Err(invalid(format!(
                    "matrix of {rows}x{cols} needs {len} bytes, only {} left",
                    data.len()
                )));
            }

            let (raw, rest) = data.split_at(len);
            let values = raw
                .chunks_exact(size_of::<f32>())
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect();
            let matrix = Array2::from_shape_vec((rows, cols), values)
                .map_err(|e| invalid(e.to_string()))?;

            matrices.push(matrix);
            data = rest;
        }

        if !data.is_empty() {
            return Err(invalid(format!("{} trailing bytes", data.len())));
        }

        let previous_deltas = matrices.split_off(n);

        Ok(Self {
            average_error,
            converged,
            matrices,
            previous_deltas,
        })
    }
}

struct WordReader<'a> {
    buf: &'a [u8],
}

impl WordReader<'_> {
    fn next(&mut self) -> io::Result<Word> {
        let Some((word, rest)) = self.buf.split_first_chunk::<WORD_SIZE>() else {
            return Err(invalid("truncated merge header".to_string()));
        };

        self.buf = rest;
        Ok(Word::from_be_bytes(*word))
    }
}

fn put_word(buf: &mut Vec<u8>, word: Word) {
    buf.extend_from_slice(&word.to_be_bytes());
}

fn to_word(n: usize) -> io::Result<Word> {
    Word::try_from(n).map_err(|_| invalid(format!("{n} doesn't fit in a protocol word")))
}

fn invalid(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed merge message: {detail}"))
}
