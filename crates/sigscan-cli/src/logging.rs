use std::{io, panic, path::Path};

use color_eyre::config::PanicHook;
use eyre::{OptionExt, Result};
use strip_ansi_escapes::Writer;
use tracing::{error, level_filters::LevelFilter};
use tracing_appender::rolling::RollingFileAppender;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::{config::Config, paths};

const LOG_VAR: &str = "SIGSCAN_LOG";

struct StripAnsiWriter((String, String));

impl StripAnsiWriter {
    fn new(dir: &str, filename: &str) -> Self {
        Self((dir.to_owned(), filename.to_owned()))
    }
}

impl<'a> MakeWriter<'a> for StripAnsiWriter {
    type Writer = Writer<RollingFileAppender>;

    fn make_writer(&'a self) -> Self::Writer {
        Writer::new(tracing_appender::rolling::never(&self.0 .0, &self.0 .1))
    }
}

/// Setup logging for the command line
///
/// `level` overrides the configured level; `SIGSCAN_LOG` overrides both.
pub fn setup_logging(config: &Config, level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_VAR)
        .with_regex(false);

    let env_filter = match std::env::var(LOG_VAR) {
        Ok(directives) if !directives.is_empty() => filter.parse(directives)?,
        _ => filter.parse(level.unwrap_or(&config.log.level))?,
    };

    // results go to stdout, so logs stay out of the way on stderr
    let stderr_layer = tracing_subscriber::fmt::Layer::default()
        .without_time()
        .with_ansi(true)
        .with_writer(io::stderr)
        .with_target(config.log.targets);

    let log_layer = match &config.log.file {
        Some(file) => {
            let path = paths::resolve_in(config.dir(), file);
            let (dir, filename) = split(&path)?;

            // a log writer which also strips ansi, because the panic report is colored
            let log_writer = StripAnsiWriter::new(&dir, &filename);

            let layer = tracing_subscriber::fmt::Layer::default()
                .with_writer(log_writer)
                .with_ansi(false)
                .with_target(config.log.targets);

            Some(layer)
        }

        None => None,
    };

    Registry::default()
        .with(stderr_layer)
        .with(log_layer)
        .with(ErrorLayer::default())
        .with(env_filter)
        .try_init()?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .into_hooks();

    eyre_hook.install()?;
    set_panic_hook(panic_hook);

    Ok(())
}

fn split(path: &Path) -> Result<(String, String)> {
    let dir = path.parent().ok_or_eyre("log file has no parent directory")?;
    let filename = path.file_name().ok_or_eyre("log file has no file name")?;

    Ok((
        dir.to_string_lossy().into_owned(),
        filename.to_string_lossy().into_owned(),
    ))
}

fn set_panic_hook(hook: PanicHook) {
    // this panic hook makes sure that eyre panic hook gets sent to all tracing layers
    panic::set_hook(Box::new(move |info| {
        let panic = hook.panic_report(info);
        error!("{panic}");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigscan.log");

        let (parent, filename) = split(&path).unwrap();
        assert_eq!(Path::new(&parent), dir.path());
        assert_eq!(filename, "sigscan.log");
    }
}
