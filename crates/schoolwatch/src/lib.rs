//! schoolwatch — homework items, change detection, and token persistence
//! for a portal homework monitor.

pub mod diff;
pub mod fingerprint;
pub mod storage;
pub mod types;

pub use diff::{detect, Detection};
pub use fingerprint::Fingerprint;
pub use storage::{SeenStore, TokenStore};
pub use types::*;
