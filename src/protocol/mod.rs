//! Wire-level plumbing: length-prefixed frames, per-connection crypto
//! state, the login interceptor, and the full-duplex relay core.

pub mod frame;
pub mod login;
pub mod relay;
pub mod session;

pub use frame::{read_frame, write_frame};
pub use relay::{InjectTarget, Relay, RelayConfig, RelayHandle};
pub use session::{Session, SessionRole};
