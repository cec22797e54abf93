use std::{fs::OpenOptions, path::Path, sync::Mutex};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize tracing for the monitor.
///
/// `RUST_LOG` wins over `level`. When `log_file` is set, the same events are
/// also appended to that file without ANSI colors.
pub fn init(service_name: &str, level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(default_directives(service_name, level))
            .map_err(|e| Error::Config(format!("invalid LOG_LEVEL {level:?}: {e}")))
    })?;

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::External(format!("logging already initialized: {e}")))?;

    Ok(())
}

/// `level` for our crates, `warn` for everything else (teloxide is chatty).
fn default_directives(service_name: &str, level: &str) -> String {
    let crate_name = service_name.replace('-', "_");
    format!("warn,{crate_name}={level},tgm={level},tgm_core={level},tgm_telegram={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_workspace_crates() {
        let d = default_directives("tgm", "debug");
        assert!(d.starts_with("warn,"));
        assert!(d.contains("tgm_core=debug"));
        assert!(d.contains("tgm_telegram=debug"));
        assert!(EnvFilter::try_new(d).is_ok());
    }
}
