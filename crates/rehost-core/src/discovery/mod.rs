//! Locating asset references inside record values.

pub mod markup;
pub mod serialized;

pub use markup::{ImageRef, MarkupDocument};
pub use serialized::SerializedArray;
