pub mod eval;
pub mod info;
pub mod quarantine;
pub mod validate;

pub use eval::run as eval;
pub use info::run as info;
pub use quarantine::{purge, recover};
pub use validate::run as validate;
