use std::io::Write;

use env_logger::fmt::style::AnsiColor;
use env_logger::{Builder, DEFAULT_FILTER_ENV};
use log::LevelFilter;

/// Initializes logging of the `mslice` binary.
///
/// `Info` is the default level, `debug` lowers it to `Debug`. Filters from `RUST_LOG` are
/// applied last and win over both.
pub fn setup_logging(debug: bool) {
    let filter_env = std::env::var(DEFAULT_FILTER_ENV).ok();
    let mut builder = Builder::default();
    builder.filter_level(default_level(debug));

    if uses_detailed_format(debug, filter_env.as_deref()) {
        builder.format_timestamp_millis();
    } else {
        builder.format(|buf, record| {
            let time = AnsiColor::BrightBlack.on_default();
            let level = buf.default_level_style(record.level()).bold();
            writeln!(
                buf,
                "{time}{}{time:#} {level}{:<5}{level:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }

    builder.parse_default_env();
    builder.init();
}

fn default_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Module paths and millisecond timestamps are only shown when debugging.
fn uses_detailed_format(debug: bool, filter_env: Option<&str>) -> bool {
    debug || filter_env.is_some_and(|filter| filter.contains("debug") || filter.contains("trace"))
}
