//! Terminal progress rendering for memory transfers

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mboot_core::transfer::TransferProgress;
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// Phase of the operation the current bar belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Erasing,
    Writing,
}

impl Phase {
    fn done_message(self) -> &'static str {
        match self {
            Self::Reading => "read complete",
            Self::Erasing => "erase complete",
            Self::Writing => "write complete",
        }
    }
}

/// Progress reporter using indicatif bars for reads and writes and a
/// spinner while flash is erased
pub struct IndicatifProgress {
    multi: MultiProgress,
    current: Option<(Phase, ProgressBar)>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current: None,
        }
    }

    /// Close the running bar and start `bar` for `phase`
    fn start(&mut self, phase: Phase, bar: ProgressBar, template: &str) {
        self.finish_current();

        let plain = || match phase {
            Phase::Erasing => ProgressStyle::default_spinner(),
            Phase::Reading | Phase::Writing => ProgressStyle::default_bar(),
        };
        let style = plain()
            .template(template)
            .unwrap_or_else(|_| plain())
            .progress_chars("#>-");
        let bar = self.multi.add(bar);
        bar.set_style(style);
        self.current = Some((phase, bar));
    }

    fn set_position(&self, done: usize) {
        if let Some((_, bar)) = &self.current {
            bar.set_position(done as u64);
        }
    }

    fn finish_current(&mut self) {
        if let Some((phase, bar)) = self.current.take() {
            bar.finish_with_message(phase.done_message());
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferProgress for IndicatifProgress {
    fn reading(&mut self, total: usize) {
        self.start(Phase::Reading, ProgressBar::new(total as u64), BAR_TEMPLATE);
    }

    fn read_progress(&mut self, done: usize) {
        self.set_position(done);
    }

    fn erasing(&mut self, bytes: usize) {
        self.start(Phase::Erasing, ProgressBar::new_spinner(), SPINNER_TEMPLATE);
        if let Some((_, spinner)) = &self.current {
            spinner.set_message(format!("erasing {} bytes...", bytes));
            spinner.enable_steady_tick(Duration::from_millis(100));
        }
    }

    fn writing(&mut self, total: usize) {
        self.start(Phase::Writing, ProgressBar::new(total as u64), BAR_TEMPLATE);
    }

    fn write_progress(&mut self, done: usize) {
        self.set_position(done);
    }

    fn finished(&mut self) {
        self.finish_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    fn hidden() -> IndicatifProgress {
        IndicatifProgress {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            current: None,
        }
    }

    fn phase(progress: &IndicatifProgress) -> Option<Phase> {
        progress.current.as_ref().map(|(phase, _)| *phase)
    }

    #[test]
    fn test_phases_replace_each_other() {
        let mut progress = hidden();

        progress.erasing(0x400);
        assert_eq!(phase(&progress), Some(Phase::Erasing));

        progress.writing(5000);
        progress.write_progress(4096);
        assert_eq!(phase(&progress), Some(Phase::Writing));
        let position = progress.current.as_ref().map(|(_, bar)| bar.position());
        assert_eq!(position, Some(4096));

        progress.finished();
        assert_eq!(phase(&progress), None);
        progress.read_progress(10);
    }
}
