use std::io;

/// Turns a value into the bytes of a single frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the frame into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to extend, it already holds the frame's length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that's written after `buf` without copying it,
    /// or an io error if the value can't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
