//! Pipeline progress reporting.
//!
//! Reports observable progress during `projector generate` so users see which
//! phase the refresh is in and how many definitions are left. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a manifest refresh.
#[derive(Clone, Debug)]
pub enum PipelineProgressEvent {
    /// Requesting the manifest pointer.
    FetchingPointer { url: String },
    /// Downloading the content bundle the pointer names.
    Downloading { url: String },
    /// Unpacking the bundle.
    Extracting { bytes: u64 },
    /// Re-keying definitions: n rows processed out of total.
    Transforming { table: String, n: u64, total: u64 },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait PipelineProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the pipeline.
    fn report(&self, event: PipelineProgressEvent);
}

/// Human-friendly progress on stderr: "manifest  DestinyInventoryItemDefinition  1,234 / 5,000".
pub struct StderrProgress;

impl PipelineProgressReporter for StderrProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let line = match &event {
            PipelineProgressEvent::FetchingPointer { url } => {
                format!("manifest  fetching pointer  {}\n", url)
            }
            PipelineProgressEvent::Downloading { url } => {
                format!("manifest  downloading  {}\n", url)
            }
            PipelineProgressEvent::Extracting { bytes } => {
                format!("manifest  extracting  {} bytes\n", format_number(*bytes))
            }
            PipelineProgressEvent::Transforming { table, n, total } => format!(
                "manifest  {}  {} / {}\n",
                table,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl PipelineProgressReporter for JsonProgress {
    fn report(&self, event: PipelineProgressEvent) {
        let obj = match &event {
            PipelineProgressEvent::FetchingPointer { url } => serde_json::json!({
                "event": "progress",
                "phase": "pointer",
                "url": url
            }),
            PipelineProgressEvent::Downloading { url } => serde_json::json!({
                "event": "progress",
                "phase": "download",
                "url": url
            }),
            PipelineProgressEvent::Extracting { bytes } => serde_json::json!({
                "event": "progress",
                "phase": "extract",
                "bytes": bytes
            }),
            PipelineProgressEvent::Transforming { table, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "transform",
                "table": table,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter, used by the HTTP trigger.
pub struct NoProgress;

impl PipelineProgressReporter for NoProgress {
    fn report(&self, _event: PipelineProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn PipelineProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
