pub mod utils;

mod api;

pub use utils::*;
