pub mod element;
pub mod ops;
pub mod utils;

pub use element::Element;
