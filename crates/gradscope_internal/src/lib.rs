pub mod prelude;

pub use gradscope_autograd as autograd;
pub use gradscope_core as core;

pub use gradscope_core::dtype::{bfloat16, bool, float16, float32, float64, half, int32, int64, int8, uint32, uint8};
