mod error;
mod handler;
mod router;

pub use error::{ApiErrorCode, recover_error};
pub use handler::ApiResponse;
pub use router::{app, routes};
