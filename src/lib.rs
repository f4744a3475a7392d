//! Utah - ephemeral VirtualBox machines from cloud disk images
//!
//! Downloads a cloud image into a local cache, converts it with
//! `qemu-img`, provisions a VirtualBox machine around a private copy and
//! drives it through boot, poweroff and delete.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod machine;
pub mod pipeline;
pub mod provision;
pub mod ui;

pub use error::{UtahError, UtahResult};
