//! Sign-up, sign-in and bearer sessions.
//!
//! Accounts live in `users.json` and issued tokens in `sessions.json`, both
//! under the storage directory. Generation code only ever sees the username a
//! token resolves to.

pub mod sessions;
pub mod users;

use rand::RngCore;
use rand::rngs::OsRng;

pub use sessions::SessionTable;
pub use users::{Account, AccountError, UserStore};

/// `len` bytes from the OS random source, hex encoded.
fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
