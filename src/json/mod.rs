//! JSON value model and structural deltas.

pub mod delta;
pub mod value;

pub use delta::{apply, delta};
pub use value::{Array, Number, Object, Value};
