//! CLI command implementations.
//!
//! | Module          | Commands handled |
//! |-----------------|------------------|
//! | `serve`         | `Serve`          |
//! | `check_config`  | `CheckConfig`    |

pub mod check_config;
pub mod serve;

pub use check_config::cmd_check_config;
pub use serve::cmd_serve;
