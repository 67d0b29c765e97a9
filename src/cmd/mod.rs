//! CLI command implementations.
//!
//! | Module      | Commands handled     |
//! |-------------|----------------------|
//! | `run`       | `Run`, `Recover`     |
//! | `checklist` | `Checklist`          |
//! | `config`    | `Config`             |

pub mod checklist;
pub mod config;
pub mod run;

pub use checklist::cmd_checklist;
pub use config::cmd_config;
pub use run::{cmd_recover, cmd_run};
