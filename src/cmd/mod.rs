//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module  | Commands handled            |
//! |---------|-----------------------------|
//! | `run`   | `Deploy`, `Verify`          |
//! | `plan`  | `List`, `Status`, `Reset`   |

pub mod plan;
pub mod run;

pub use plan::{cmd_list, cmd_reset, cmd_status};
pub use run::{cmd_deploy, cmd_verify};
