mod key;
mod session;

pub use key::*;
pub use session::*;
