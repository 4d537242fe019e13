//! Interactive TTY observer: one spinner for the current phase, a
//! checkmark line per completed step.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::flow::RunState;

use super::{Observer, Transition, activity, completed_step, summary};

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .unwrap()
}

pub struct InteractiveObserver {
    bar: ProgressBar,
    step: usize,
    total_steps: usize,
    quiet: bool,
}

impl InteractiveObserver {
    /// `total_steps` is the number of steps the flow completes on success.
    pub fn new(total_steps: usize, quiet: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            step: 0,
            total_steps,
            quiet,
        }
    }

    fn prefix(&self) -> String {
        format!("{}/{}", (self.step + 1).min(self.total_steps), self.total_steps)
    }
}

impl Observer for InteractiveObserver {
    fn on_transition(&mut self, t: &Transition) {
        if let Some(label) = completed_step(t) {
            self.step += 1;
            if !self.quiet {
                self.bar.println(format!(
                    "[{}/{}] {} {}",
                    self.step,
                    self.total_steps,
                    style("\u{2713}").green(),
                    style(label).green()
                ));
            }
        }
        if let Some(error) = t.event.error() {
            self.bar
                .println(format!("{} {}", style("\u{2717}").red(), style(error).red()));
        }

        match activity(t.new_phase) {
            Some(message) => {
                self.bar.set_prefix(self.prefix());
                self.bar.set_message(message);
            }
            None if t.new_phase.is_terminal() => self.bar.finish_and_clear(),
            None => {}
        }
    }

    fn on_ready(&mut self, state: &RunState) {
        for line in summary(state) {
            let line = if line.starts_with("warning:") {
                style(line).yellow().to_string()
            } else {
                line
            };
            self.bar.println(format!("      \u{2192} {line}"));
        }
    }

    fn on_interrupt(&mut self, hard: bool) {
        let message = if hard {
            "Forcing the VM to stop".to_string()
        } else {
            format!(
                "Stopping the VM {}",
                style("(press Ctrl+C again to force)").dim()
            )
        };
        self.bar.println(message);
    }
}
