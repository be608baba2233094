pub use gradscope_internal::*;
