pub mod probe;
pub mod session;

pub use probe::*;
pub use session::*;
