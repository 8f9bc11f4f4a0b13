mod anti_csrf_guard;
mod handshake_service_impl;
mod key_rotator;
mod key_store;
mod session_manager;
mod session_reaper;
mod token_codec_impl;

pub use anti_csrf_guard::*;
pub use handshake_service_impl::*;
pub use key_rotator::*;
pub use key_store::*;
pub use session_manager::*;
pub use session_reaper::*;
pub use token_codec_impl::*;
