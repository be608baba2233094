pub mod cpu;
pub mod ops;
