use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to one dataset during a run.
#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub name: String,
    pub result: std::result::Result<DeliveredArtifact, String>,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct DeliveredArtifact {
    /// Local blob path; gone after upload unless `keep_uploaded` is set.
    pub artifact: PathBuf,
    pub key: String,
    pub fingerprint: String,
    pub bytes: u64,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub datasets: Vec<DatasetOutcome>,
    /// Leftover outbox artifacts delivered at the start of the run.
    pub redelivered: usize,
    /// Set when shutdown stopped the run before every dataset was processed.
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.datasets.iter().filter(|d| d.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.datasets.len() - self.succeeded()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.datasets
            .iter()
            .filter(|d| !d.is_success())
            .map(|d| d.name.as_str())
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.datasets {
            match &outcome.result {
                Ok(a) => writeln!(f, "  ok      {:<12} {} ({} bytes)", outcome.name, a.key, a.bytes)?,
                Err(e) => writeln!(f, "  FAILED  {:<12} {e}", outcome.name)?,
            }
        }
        write!(
            f,
            "{} succeeded, {} failed, {} re-delivered in {:.1}s",
            self.succeeded(),
            self.failed(),
            self.redelivered,
            self.elapsed.as_secs_f64()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}
