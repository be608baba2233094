pub mod be;
pub mod device;
pub mod dtype;
pub mod error;
pub mod executor;
pub mod host;
pub mod layout;
pub mod op;

pub use gradscope_cpu as cpu;
