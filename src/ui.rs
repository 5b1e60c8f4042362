use colored::Colorize;

use protocol::{LogLevel, StreamMessage};
use util::Timer;

use crate::settings::Settings;

/// All human-facing terminal output goes through this struct.
/// It writes to stderr only; stdout carries the machine-readable stream.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// keeps track of time for the whole run
    timer: Timer,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            timer: Timer::now(),
        }
    }

    /// Render one stream message for a person watching the run.
    pub fn show(&self, msg: &StreamMessage) {
        match msg {
            StreamMessage::Log(event) => {
                let level = match event.level {
                    LogLevel::Info => "INFO".cyan(),
                    LogLevel::Warning => "WARN".yellow(),
                    LogLevel::Error => "ERROR".red(),
                };
                eprintln!("{level} [{}] {}", event.source.dimmed(), event.message);
            }
            StreamMessage::Result(result) if result.success => {
                eprintln!("\n{} {}", "COMPLETED".green(), result.summary());
            }
            StreamMessage::Result(result) => {
                eprintln!("\n{} {}", "FAILED".red(), result.summary());
            }
            StreamMessage::Error(e) => {
                eprintln!("\n{} {}", "ERROR".red(), e.message);
            }
        }
    }

    pub fn start_timer(&mut self) {
        self.timer.reset();
    }

    pub fn print_elapsed(&self, label: &str) {
        if self.verbose {
            self.timer.print_elapsed(label);
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg.magenta());
        }
    }
}
