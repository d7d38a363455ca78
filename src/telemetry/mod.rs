//! Logging setup. The runtime never installs a subscriber itself; hosts and tests call
//! [telemetry_init] or [telemetry_init_global].

use itertools::Itertools;
use once_cell::sync::OnceCell;
use std::{collections::VecDeque, env, sync::Arc};
use tracing::{Level, Subscriber};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// Control where logs go
#[derive(Debug, Clone)]
pub enum Logger {
    /// Log directly to console.
    Console {
        /// An [EnvFilter] filter string.
        filter: String,
    },
}

/// Telemetry configuration options. Construct with [TelemetryOptionsBuilder]
#[derive(Debug, Clone, Default, derive_builder::Builder)]
#[non_exhaustive]
pub struct TelemetryOptions {
    /// Optional logger - set as None to disable.
    #[builder(setter(into, strip_option), default)]
    pub logging: Option<Logger>,
}

/// Help you construct an [EnvFilter] compatible filter string which will forward all runtime
/// traces at `core_level` and all others (from 3rd party modules, etc) at `other_level`.
pub fn construct_filter_string(core_level: Level, other_level: Level) -> String {
    format!(
        "{o},temporal_workflow_runtime={l}",
        o = other_level,
        l = core_level
    )
}

/// Build a subscriber per the options. Nothing is installed.
pub fn telemetry_init(opts: &TelemetryOptions) -> Arc<dyn Subscriber + Send + Sync> {
    let mut console_pretty_layer = None;
    let mut console_compact_layer = None;
    if let Some(Logger::Console { filter }) = &opts.logging {
        // This is silly dupe but can't be avoided without boxing.
        if env::var("TEMPORAL_CORE_PRETTY_LOGS").is_ok() {
            console_pretty_layer = Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .event_format(
                        tracing_subscriber::fmt::format()
                            .pretty()
                            .with_source_location(false),
                    )
                    .with_filter(EnvFilter::new(filter)),
            );
        } else {
            console_compact_layer = Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .event_format(
                        tracing_subscriber::fmt::format()
                            .compact()
                            .with_source_location(false),
                    )
                    .with_filter(EnvFilter::new(filter)),
            );
        }
    }
    let reg = tracing_subscriber::registry()
        .with(console_pretty_layer)
        .with(console_compact_layer);
    Arc::new(reg)
}

static GLOBAL_SUBSCRIBER: OnceCell<()> = OnceCell::new();

/// Build a subscriber and set it as the global default. Calls after the first successful one do
/// nothing.
pub fn telemetry_init_global(opts: &TelemetryOptions) -> Result<(), anyhow::Error> {
    GLOBAL_SUBSCRIBER.get_or_try_init(|| {
        let subscriber = telemetry_init(opts);
        tracing::subscriber::set_global_default(subscriber)?;
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

/// A trait for using [Display](std::fmt::Display) on the contents of vecs, etc, which don't
/// implement it.
pub(crate) trait VecDisplayer {
    fn display(&self) -> String;
}

impl<T> VecDisplayer for Vec<T>
where
    T: std::fmt::Display,
{
    fn display(&self) -> String {
        format!("[{}]", self.iter().format(","))
    }
}

impl<T> VecDisplayer for VecDeque<T>
where
    T: std::fmt::Display,
{
    fn display(&self) -> String {
        format!("[{}]", self.iter().format(","))
    }
}
