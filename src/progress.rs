//! Sync progress reporting.
//!
//! Reports what a pass is doing (opening the workspace, materializing the
//! tree, applying n of total file operations) so users of `ris sync` see how
//! much is left. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event for one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Cloning or exporting the tree. Total unknown.
    Materializing { resource_id: i64 },
    /// Computing the change set between two commits.
    Diffing { resource_id: i64 },
    /// File operations: n applied out of total.
    Applying { resource_id: i64, n: u64, total: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync resource 3  applying  120 / 1,500 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Materializing { resource_id } => {
                format!("sync resource {}  materializing...\n", resource_id)
            }
            SyncProgressEvent::Diffing { resource_id } => {
                format!("sync resource {}  diffing...\n", resource_id)
            }
            SyncProgressEvent::Applying {
                resource_id,
                n,
                total,
            } => format!(
                "sync resource {}  applying  {} / {} files\n",
                resource_id,
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

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &SyncProgressEvent) -> serde_json::Value {
    match event {
        SyncProgressEvent::Materializing { resource_id } => serde_json::json!({
            "event": "progress",
            "resource": resource_id,
            "phase": "materializing"
        }),
        SyncProgressEvent::Diffing { resource_id } => serde_json::json!({
            "event": "progress",
            "resource": resource_id,
            "phase": "diffing"
        }),
        SyncProgressEvent::Applying {
            resource_id,
            n,
            total,
        } => serde_json::json!({
            "event": "progress",
            "resource": resource_id,
            "phase": "applying",
            "n": n,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
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

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
