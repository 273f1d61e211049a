/// Plain numeric types a receive buffer can be made of.
pub trait Align1: bytemuck::Pod {}

/// Buffer element types aligned to at least 4 bytes, frames read into a `Vec` of these can be
/// reinterpreted as `f32`/`u32` words without copying.
pub trait Align4: Align1 {}

macro_rules! impl_align {
    ($trait:ident: $($ty:ty),*) => {
        $(impl $trait for $ty {})*
    };
}

impl_align!(Align1: u8, u16, u32, u64, i32, i64, f32, f64);
impl_align!(Align4: u32, u64, i32, i64, f32, f64);
