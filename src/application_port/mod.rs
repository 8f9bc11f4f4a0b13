mod handshake_service;
mod session_service;
mod token_codec;

pub use handshake_service::*;
pub use session_service::*;
pub use token_codec::*;
