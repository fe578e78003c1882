pub mod admin;
pub mod credentials;
pub mod session;

pub use admin::*;
pub use credentials::*;
pub use session::*;
