use std::io::Write;
use log::debug;

/// Told once when a run has finished and its report was written
pub trait Notifier {
    fn run_finished(&self, jobs: usize, failed: usize);
}

/// Rings the terminal bell
#[derive(Debug, Default, Clone, Copy)]
pub struct BellNotifier;

impl Notifier for BellNotifier {
    fn run_finished(&self, jobs: usize, failed: usize) {
        debug!("Ringing bell: {} job(s), {} failed", jobs, failed);
        let mut out = std::io::stdout();
        // terminal without a bell just ignores it
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn run_finished(&self, _jobs: usize, _failed: usize) {}
}
