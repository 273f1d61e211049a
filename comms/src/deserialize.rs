use std::io;

/// Rebuilds a value from the bytes of a single frame.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
