use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter used when `RUST_LOG` is unset
fn default_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "llm_press=debug"
    } else if quiet {
        "llm_press=error"
    } else {
        "llm_press=info"
    }
}

/// Initialize logging based on output mode and debug flag
///
/// With `json` the stderr log is one JSON object per line. The returned
/// guard flushes the log file when dropped; keep it alive for the life of
/// the process.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    json: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug, quiet)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(fmt_layer.json().boxed());
    } else {
        layers.push(fmt_layer.boxed());
    }

    let mut guard = None;
    if let Some(log_path) = log_file {
        // Create log directory if needed
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let (writer, file_guard) = tracing_appender::non_blocking(file);
        guard = Some(file_guard);

        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    Ok(guard)
}

/// Get default log file path for a workflow run
pub fn default_log_path(workflow_id: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("llmpress")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", workflow_id, timestamp);

    Ok(log_dir.join(filename))
}
