//! CLI command implementations.
//!
//! | Module   | Commands handled                       |
//! |----------|----------------------------------------|
//! | `serve`  | `Serve`                                |
//! | `init`   | `Init`                                 |
//! | `user`   | `User Create/List/Activate/Deactivate` |

pub mod init;
pub mod serve;
pub mod user;

pub use init::cmd_init;
pub use serve::cmd_serve;
pub use user::{UserArgs, cmd_user_create, cmd_user_list, cmd_user_set_active};
