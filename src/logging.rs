use miette::{Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields, FormattedFields},
    registry::LookupSpan,
    FmtSubscriber,
};

/// Initialize the logging system.
///
/// Must run before the async runtime starts: reading the local offset
/// is refused once other threads exist.
pub fn init_logging(level: Level) -> Result<()> {
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let subscriber = FmtSubscriber::builder()
        .event_format(MyPrettyLogger::new(local_offset))
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// Compact logger: local time, level, and the module the event comes from
struct MyPrettyLogger {
    offset: UtcOffset,
    time_format: &'static [FormatItem<'static>],
}

impl MyPrettyLogger {
    fn new(offset: UtcOffset) -> Self {
        Self {
            offset,
            time_format: format_description!("[hour]:[minute]:[second]"),
        }
    }
}

/// `wavefetch::download::fetcher` -> `fetcher`
fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for MyPrettyLogger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let now = OffsetDateTime::now_utc().to_offset(self.offset).time();
        let now = now.format(self.time_format).map_err(|_| std::fmt::Error)?;
        let target = short_target(metadata.target());

        if writer.has_ansi_escapes() {
            let level = match *metadata.level() {
                Level::ERROR => metadata.level().red().to_string(),
                Level::WARN => metadata.level().yellow().to_string(),
                Level::DEBUG => metadata.level().blue().to_string(),
                Level::TRACE => metadata.level().purple().to_string(),
                _ => metadata.level().green().to_string(),
            };

            write!(&mut writer, "{} {:>5} {:<12} ", now.dimmed(), level, target.yellow())?;
        } else {
            write!(&mut writer, "{} {:>5} {:<12} ", now, metadata.level(), target)?;
        }

        // Request spans (e.g. `request{id=3}`) give the context of the event
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_shortened() {
        assert_eq!(short_target("wavefetch::download::fetcher"), "fetcher");
        assert_eq!(short_target("wavefetch"), "wavefetch");
    }
}
