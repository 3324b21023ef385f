//! Target device selection
//!
//! Enumeration may return several bootloader targets. One match is used
//! directly; more than one is resolved by a [`SelectionStrategy`], either an
//! interactive prompt or a fixed rule for unattended use.

use std::io::{BufRead, Write};

use log::info;

use crate::device::{DeviceBus, DeviceDescriptor};
use crate::error::{Error, Result};

/// Picks one device out of several candidates
pub trait SelectionStrategy {
    /// Return the index of the chosen descriptor
    ///
    /// Only called with two or more candidates.
    fn choose(&mut self, candidates: &[DeviceDescriptor]) -> Result<usize>;
}

/// Non-interactive selection rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSelection {
    /// Take the first candidate
    First,
    /// Refuse to guess when more than one candidate matches
    Unique,
}

impl SelectionStrategy for RuleSelection {
    fn choose(&mut self, candidates: &[DeviceDescriptor]) -> Result<usize> {
        match self {
            Self::First => Ok(0),
            Self::Unique => Err(Error::Usage(format!(
                "{} devices match, use --target to pick one",
                candidates.len()
            ))),
        }
    }
}

/// Ask the operator on a terminal
///
/// Prints an indexed list to `output` and reads one line with the index from
/// `input`. Input that is not a listed index is a usage error; there is no
/// second attempt.
pub struct PromptSelection<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSelection<R, W> {
    /// Create a prompt reading from `input` and writing to `output`
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptSelection<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompt on the process standard streams
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> SelectionStrategy for PromptSelection<R, W> {
    fn choose(&mut self, candidates: &[DeviceDescriptor]) -> Result<usize> {
        writeln!(self.output)?;
        for (i, desc) in candidates.iter().enumerate() {
            writeln!(self.output, " {}) {}", i, desc)?;
        }
        write!(self.output, "\n Select: ")?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let answer = line.trim();

        match answer.parse::<usize>() {
            Ok(index) if index < candidates.len() => Ok(index),
            _ => Err(Error::Usage(format!(
                "'{}' is not a device index between 0 and {}",
                answer,
                candidates.len() - 1
            ))),
        }
    }
}

/// List devices on `bus` whose name contains `filter` (case-insensitive)
pub fn enumerate(bus: &dyn DeviceBus, filter: Option<&str>) -> Result<Vec<DeviceDescriptor>> {
    let mut devices = bus.enumerate(filter)?;
    if let Some(filter) = filter {
        devices.retain(|d| d.matches(filter));
    }
    Ok(devices)
}

/// Resolve exactly one descriptor from enumeration results
///
/// # Errors
/// * `NoDeviceFound` - If `candidates` is empty
/// * Whatever `strategy` returns for two or more candidates
pub fn select(
    mut candidates: Vec<DeviceDescriptor>,
    strategy: &mut dyn SelectionStrategy,
) -> Result<DeviceDescriptor> {
    let index = match candidates.len() {
        0 => return Err(Error::NoDeviceFound),
        1 => 0,
        _ => strategy.choose(&candidates)?,
    };
    if index >= candidates.len() {
        return Err(Error::Usage(format!("device index {} out of range", index)));
    }

    let chosen = candidates.swap_remove(index);
    info!("Selected device: {}", chosen);
    Ok(chosen)
}

/// Enumerate `bus` and resolve a single target
pub fn select_device(
    bus: &dyn DeviceBus,
    filter: Option<&str>,
    strategy: &mut dyn SelectionStrategy,
) -> Result<DeviceDescriptor> {
    select(enumerate(bus, filter)?, strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn descriptors(names: &[&str]) -> Vec<DeviceDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceDescriptor {
                name: name.to_string(),
                vendor_id: 0x1FC9,
                product_id: 0x0021,
                path: format!("usb:{}", i),
            })
            .collect()
    }

    /// Strategy that must never be consulted
    struct Forbidden;

    impl SelectionStrategy for Forbidden {
        fn choose(&mut self, _candidates: &[DeviceDescriptor]) -> Result<usize> {
            panic!("strategy consulted");
        }
    }

    #[test]
    fn test_empty_is_not_found() {
        let err = select(vec![], &mut Forbidden).unwrap_err();
        assert!(matches!(err, Error::NoDeviceFound));
    }

    #[test]
    fn test_single_match_auto_selected() {
        let chosen = select(descriptors(&["LPC55S69"]), &mut Forbidden).unwrap();
        assert_eq!(chosen.name, "LPC55S69");
    }

    #[test]
    fn test_rules() {
        let chosen = select(descriptors(&["A", "B"]), &mut RuleSelection::First).unwrap();
        assert_eq!(chosen.name, "A");

        let err = select(descriptors(&["A", "B"]), &mut RuleSelection::Unique).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_prompt() {
        let mut out = Vec::new();
        let mut prompt = PromptSelection::new(Cursor::new("1\n"), &mut out);
        let chosen = select(descriptors(&["KL27Z", "KL28Z"]), &mut prompt).unwrap();
        assert_eq!(chosen.name, "KL28Z");

        let listing = String::from_utf8(out).unwrap();
        assert!(listing.contains(" 0) KL27Z"));
        assert!(listing.contains(" 1) KL28Z"));
    }

    #[test]
    fn test_prompt_rejects_bad_input() {
        for answer in ["2\n", "x\n", "\n", "-1\n"] {
            let mut prompt = PromptSelection::new(Cursor::new(answer), Vec::new());
            let err = select(descriptors(&["A", "B"]), &mut prompt).unwrap_err();
            assert!(matches!(err, Error::Usage(_)), "{:?}", answer);
        }
    }
}
