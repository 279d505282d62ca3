/*!
 * CLI progress renderer for interactive terminal display
 *
 * Subscribes to engine events and renders them as a single status line with
 * progress percentage, rewritten in place on stderr.
 */

use std::io::{self, Write};
use std::thread;

use crate::core::events::{EngineEvent, EventSubscriber, ExitCode};

/// CLI renderer draining an engine event subscription
pub struct CliProgressRenderer {
    subscriber: EventSubscriber,
    quiet: bool,
}

impl CliProgressRenderer {
    pub fn new(subscriber: EventSubscriber, quiet: bool) -> Self {
        Self { subscriber, quiet }
    }

    /// Run the renderer in the current thread until the engine finishes or
    /// the publisher goes away
    pub fn run(self) -> io::Result<ExitCode> {
        let mut last_percent = 0u8;
        let mut last_status = String::new();
        let mut exit_code = ExitCode::Success;

        while let Some(event) = self.subscriber.recv() {
            match event {
                EngineEvent::Progress(percent) => {
                    last_percent = percent;
                    self.draw(last_percent, &last_status)?;
                }
                EngineEvent::Status(line) => {
                    last_status = line;
                    self.draw(last_percent, &last_status)?;
                }
                EngineEvent::PauseChanged(paused) => {
                    if !self.quiet {
                        eprintln!();
                        eprintln!("{}", if paused { "Paused" } else { "Resumed" });
                    }
                }
                EngineEvent::Finished(code) => {
                    exit_code = code;
                    if !self.quiet {
                        eprintln!();
                    }
                }
            }
        }

        Ok(exit_code)
    }

    /// Spawn the renderer in a background thread
    pub fn spawn(self) -> thread::JoinHandle<io::Result<ExitCode>> {
        thread::spawn(move || self.run())
    }

    fn draw(&self, percent: u8, status: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut stderr = io::stderr();
        write!(stderr, "\r[{:>3}%] {}", percent, status)?;
        stderr.flush()
    }
}
