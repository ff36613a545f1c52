mod construct;
mod types;

pub use self::construct::*;
pub use self::types::*;
