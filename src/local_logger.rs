use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::prelude::*;
use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use log::Log;
use simplelog::{CombinedLogger, SharedLogger};
use std::io::Write;

use crate::logger::{GroupEvent, get_group_event};

pub const DDS_VERIFY_U8_COLOR_CODE: u8 = 39; // #00AFFF

/// Environment variable holding the log level filter, `info` when unset or invalid.
pub const LOG_LEVEL_ENV: &str = "DDS_VERIFY_LOG";

lazy_static! {
    pub static ref SPINNER: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    pub static ref IS_TTY: bool = std::io::IsTerminal::is_terminal(&std::io::stdout());
}

/// Hide the progress bar temporarily, execute `f`, then redraw the progress bar.
///
/// If the output is not a TTY, `f` will be executed without hiding the progress bar.
pub fn suspend_progress_bar<F: FnOnce() -> R, R>(f: F) -> R {
    if *IS_TTY {
        if let Ok(mut spinner) = SPINNER.lock() {
            if let Some(spinner) = spinner.as_mut() {
                return spinner.suspend(f);
            }
        }
    }

    f()
}

fn level_from_env() -> log::LevelFilter {
    env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info)
}

pub struct LocalLogger {
    log_level: log::LevelFilter,
}

impl LocalLogger {
    pub fn new() -> Self {
        LocalLogger {
            log_level: level_from_env(),
        }
    }
}

impl Default for LocalLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for LocalLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.log_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(group_event) = get_group_event(record) {
            match group_event {
                GroupEvent::Start(name) => start_spinner(&name),
                GroupEvent::End => clean_logger(),
            }
            return;
        }

        suspend_progress_bar(|| print_record(record));
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

fn start_spinner(name: &str) {
    eprintln!(
        "\n{}",
        style(format!("►►► {name} "))
            .bold()
            .color256(DDS_VERIFY_U8_COLOR_CODE)
    );

    if !*IS_TTY {
        eprintln!("{name}...");
        return;
    }

    let template = format!(
        "  {{spinner:>.{DDS_VERIFY_U8_COLOR_CODE}}} {{wide_msg:.{DDS_VERIFY_U8_COLOR_CODE}.bold}}"
    );
    let Ok(spinner_style) = ProgressStyle::with_template(&template) else {
        return;
    };
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style);
    spinner.set_message(format!("{name}..."));
    spinner.enable_steady_tick(Duration::from_millis(100));
    if let Ok(mut current) = SPINNER.lock() {
        if let Some(previous) = current.replace(spinner) {
            previous.finish_and_clear();
        }
    }
}

/// Print a log record to the console with the appropriate style.
///
/// Everything goes to stderr: stdout is reserved for command results (JSON reports, JSONL
/// samples, captured process logs).
fn print_record(record: &log::Record) {
    let error_style = Style::new().red();
    let info_style = Style::new().white();
    let warn_style = Style::new().yellow();
    let debug_style = Style::new().blue().dim();
    let trace_style = Style::new().black().dim();

    match record.level() {
        log::Level::Error => eprintln!("{}", error_style.apply_to(record.args())),
        log::Level::Warn => eprintln!("{}", warn_style.apply_to(record.args())),
        log::Level::Info => eprintln!("{}", info_style.apply_to(record.args())),
        log::Level::Debug => eprintln!(
            "{}",
            debug_style.apply_to(format!("[DEBUG::{}] {}", record.target(), record.args())),
        ),
        log::Level::Trace => eprintln!(
            "{}",
            trace_style.apply_to(format!("[TRACE::{}] {}", record.target(), record.args()))
        ),
    }
}

impl SharedLogger for LocalLogger {
    fn level(&self) -> log::LevelFilter {
        self.log_level
    }

    fn config(&self) -> Option<&simplelog::Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    Box::new(LocalLogger::new())
}

pub fn init_local_logger() -> Result<()> {
    let logger = get_local_logger();
    CombinedLogger::init(vec![logger])?;
    Ok(())
}

pub fn clean_logger() {
    if let Ok(mut spinner) = SPINNER.lock() {
        if let Some(spinner) = spinner.take() {
            spinner.finish_and_clear();
        }
    }
}
