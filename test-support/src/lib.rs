pub mod fake_smtp;

use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;

/// Routes `log` and `tracing` output from the code under test to the terminal. Safe to call from
/// every test.
pub fn setup_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )]);
    });
}
