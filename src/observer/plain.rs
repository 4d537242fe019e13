//! Plain text observer: no ANSI, suitable for piped output.

use crate::flow::RunState;

use super::{Observer, Transition, completed_step, summary};

pub struct PlainObserver {
    step: usize,
    total_steps: usize,
    quiet: bool,
}

impl PlainObserver {
    /// `quiet` drops the step lines and keeps errors and the ready summary.
    pub fn new(total_steps: usize, quiet: bool) -> Self {
        Self {
            step: 0,
            total_steps,
            quiet,
        }
    }

    fn step_line(&mut self, label: &str) -> String {
        self.step += 1;
        format!("[{}/{}] \u{2713} {label}", self.step, self.total_steps)
    }
}

impl Observer for PlainObserver {
    fn on_transition(&mut self, t: &Transition) {
        if let Some(label) = completed_step(t) {
            let line = self.step_line(&label);
            if !self.quiet {
                println!("{line}");
            }
        }
        if let Some(error) = t.event.error() {
            eprintln!("error: {error}");
        }
    }

    fn on_ready(&mut self, state: &RunState) {
        for line in summary(state) {
            println!("      \u{2192} {line}");
        }
    }

    fn on_interrupt(&mut self, hard: bool) {
        if hard {
            eprintln!("Forcing the VM to stop");
        } else {
            eprintln!("Stopping the VM (press Ctrl+C again to force)");
        }
    }
}
