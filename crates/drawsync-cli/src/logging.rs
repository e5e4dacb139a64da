use drawsync_core::config::LoggingConfig;
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the config file; `--verbose` only raises the
/// default when neither sets a level.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_filter(config, verbose));

    let json = config.is_some_and(|c| c.format.eq_ignore_ascii_case("json"));
    let stdout = config.is_some_and(|c| c.output.eq_ignore_ascii_case("stdout"));

    let registry = tracing_subscriber::registry().with(filter);
    match (json, stdout) {
        (true, true) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
            .init(),
        (true, false) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (false, true) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
            .init(),
        (false, false) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn build_filter(config: Option<&LoggingConfig>, verbose: bool) -> EnvFilter {
    let level = config
        .and_then(|c| c.level.clone())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

    let mut filter = EnvFilter::new(&level);
    for directive in config.map(|c| c.filters.as_slice()).unwrap_or_default() {
        match directive.parse::<Directive>() {
            Ok(d) => filter = filter.add_directive(d),
            // Subscriber isn't up yet
            Err(e) => eprintln!("ignoring log filter {directive:?}: {e}"),
        }
    }
    filter
}
