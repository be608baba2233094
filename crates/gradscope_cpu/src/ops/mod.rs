pub mod binary;
pub mod indexing;
pub mod matmul;
pub mod reduction;
pub mod unary;
