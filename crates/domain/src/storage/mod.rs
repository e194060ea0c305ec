//! Storage contracts implemented by `keydrop_storage`.

mod traits;

pub use traits::*;
