//! Device backend registration and dispatch
//!
//! Backends are the buses mboot enumerates bootloader targets on. Each one is
//! feature-gated; the registry only lists what was compiled in.

use mboot_core::device::DeviceBus;
use mboot_core::{Error, Result};

/// Information about a backend
pub struct BackendInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

impl BackendInfo {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

/// Get information about all available backends (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        aliases: &["emulator"],
        description: "One emulated KL27Z bootloader target",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy-multi",
        aliases: &[],
        description: "Emulated KL27Z and LPC55S69 targets (exercises device selection)",
    });

    backends
}

/// Generate help text listing all available backends
pub fn backend_help() -> String {
    let backends = available_backends();

    if backends.is_empty() {
        return "No backends available (recompile with backend features enabled)".to_string();
    }

    let mut help = String::from("Available backends:\n");
    for b in &backends {
        help.push_str(&format!("  {:12} - {}\n", b.name, b.description));
    }
    help
}

/// Generate a short list of backend names for CLI help
pub fn backend_names_short() -> String {
    let backends = available_backends();
    let names: Vec<&str> = backends.iter().map(|b| b.name).collect();
    names.join(", ")
}

/// Open the bus behind the backend called `name`
pub fn open_bus(name: &str) -> Result<Box<dyn DeviceBus>> {
    let info = available_backends()
        .into_iter()
        .find(|b| b.matches(name))
        .ok_or_else(|| unknown_backend_error(name))?;

    log::debug!("Using backend '{}'", info.name);

    match info.name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            use mboot_dummy::{DummyBus, DummyConfig};
            Ok(Box::new(DummyBus::new().with(DummyConfig::kl27())))
        }
        #[cfg(feature = "dummy")]
        "dummy-multi" => {
            use mboot_dummy::{DummyBus, DummyConfig};
            Ok(Box::new(
                DummyBus::new()
                    .with(DummyConfig::kl27())
                    .with(DummyConfig::lpc55()),
            ))
        }
        _ => Err(unknown_backend_error(name)),
    }
}

fn unknown_backend_error(name: &str) -> Error {
    Error::Usage(format!(
        "unknown backend '{}' [available: {}]",
        name,
        backend_names_short()
    ))
}
