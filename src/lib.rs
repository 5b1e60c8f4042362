/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Where jobs run: the cluster interface and its backends
pub mod cluster;
/// Submitting, waiting on and cleaning up executions
pub mod exec;
/// Filesystem operations for local jobs
mod fs;
/// Building the script and spec of a job
pub mod prep;
/// Command-line run settings
mod settings;
/// Streaming sessions and retained results
pub mod stream;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::Args;
pub use settings::Settings;

/// Run the command-line app. Returns whether the execution succeeded.
pub fn run() -> Result<bool, anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()
}
