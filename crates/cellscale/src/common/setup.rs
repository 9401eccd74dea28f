use std::io::Write;

use env_logger::fmt::style::{AnsiColor, Style};
use env_logger::{Builder, DEFAULT_FILTER_ENV};
use log::LevelFilter;

const CRATE_MODULE: &str = "cellscale";

/// Initializes the global logger.
///
/// Only this crate logs at `Info` (`Debug` with `debug`); dependencies are limited to warnings.
/// `RUST_LOG` overrides both.
pub fn setup_logging(debug: bool) {
    let env_debug = std::env::var(DEFAULT_FILTER_ENV).is_ok_and(|v| v.contains("debug"));
    let mut builder = create_logger(debug, debug || env_debug);
    builder.parse_default_env();
    builder.init();
}

/// Logger configuration without environment overrides.
///
/// The detailed format adds milliseconds and the module of each record, which is what one
/// needs to follow a placement search; the short one is `<time> <level> <message>`.
pub fn create_logger(debug: bool, detailed: bool) -> Builder {
    let mut builder = Builder::default();
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module(
        CRATE_MODULE,
        if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
    );

    let time_style = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
    if detailed {
        builder.format(move |buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{time_style}{}{time_style:#} {level_style}{:<5}{level_style:#} [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                module_label(record.target()),
                record.args()
            )
        });
    } else {
        builder.format(move |buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();
            writeln!(
                buf,
                "{time_style}{}{time_style:#} {level_style}{}{level_style:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        });
    }
    builder
}

/// Module path of a log target relative to this crate.
fn module_label(target: &str) -> &str {
    target
        .strip_prefix(CRATE_MODULE)
        .and_then(|rest| rest.strip_prefix("::"))
        .unwrap_or(target)
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use crate::common::setup::{create_logger, module_label};

    #[test]
    fn crate_level_follows_debug_flag() {
        assert_eq!(create_logger(false, false).build().filter(), LevelFilter::Info);
        assert_eq!(create_logger(true, true).build().filter(), LevelFilter::Debug);
    }

    #[test]
    fn strip_crate_from_module() {
        assert_eq!(
            module_label("cellscale::autoscale::placement"),
            "autoscale::placement"
        );
        assert_eq!(module_label("cellscale"), "cellscale");
        assert_eq!(module_label("tokio::process"), "tokio::process");
    }
}
