//! CLI command implementations.
//!
//! | Module     | Commands handled   |
//! |------------|--------------------|
//! | `serve`    | `Serve`            |
//! | `generate` | `Generate`         |
//! | `sandbox`  | `DeleteSandbox`    |
//! | `config`   | `Config`           |

pub mod config;
pub mod generate;
pub mod sandbox;
pub mod serve;

pub use config::cmd_config;
pub use generate::{GenerateArgs, cmd_generate};
pub use sandbox::cmd_delete_sandbox;
pub use serve::cmd_serve;
