use std::sync::Once;

use simplelog::{Config, LevelFilter, TestLogger};

static INIT: Once = Once::new();

/// Routes `log` output of the crate into the test harness capture.
pub fn init_logger() {
    INIT.call_once(|| {
        let _ = TestLogger::init(LevelFilter::Trace, Config::default());
    });
}
