pub mod engine;
pub mod policy;
pub mod window;

pub use engine::*;
pub use policy::*;
pub use window::*;
