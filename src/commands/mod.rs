//! CLI command implementations
//!
//! Every command drives one [`Transfer`](mboot_core::transfer::Transfer):
//! the device is selected, opened, used and closed inside the core, and the
//! functions here only turn arguments into requests and outcomes into text.

mod control;
mod info;
mod memory;

pub use control::{run_call, run_execute, run_fuse, run_reset, run_unlock, run_update};
pub use info::{list_backends, run_info, run_list_memories};
pub use memory::{
    run_configure_memory, run_erase, run_fill, run_read, run_receive_image, run_write,
};
