use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

/// File name prefix of every encrypted artifact.
pub const ARTIFACT_PREFIX: &str = "backup_";
/// File name suffix of every encrypted artifact.
pub const ARTIFACT_SUFFIX: &str = ".enc";
/// UTC timestamp layout embedded in artifact names (minute resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

const TIMESTAMP_LEN: usize = "YYYY-MM-DD_HH-MM".len();

/// Name of one encrypted dataset artifact:
/// `backup_<YYYY-MM-DD_HH-MM>_<dataset>.enc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    created: DateTime<Utc>,
    dataset: String,
}

impl ArtifactName {
    /// Build a name for `dataset` stamped at `at`, truncated to the minute.
    pub fn new(dataset: &str, at: DateTime<Utc>) -> Self {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let created = parse_stamp(&stamp).unwrap_or(at);
        Self {
            created,
            dataset: dataset.to_string(),
        }
    }

    pub fn now(dataset: &str) -> Self {
        Self::new(dataset, Utc::now())
    }

    /// Parse a file name produced by [`ArtifactName::file_name`].
    ///
    /// Returns `None` for anything else (partial writes, archives, stray files).
    pub fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name
            .strip_prefix(ARTIFACT_PREFIX)?
            .strip_suffix(ARTIFACT_SUFFIX)?;
        if rest.len() <= TIMESTAMP_LEN + 1 || !rest.is_char_boundary(TIMESTAMP_LEN) {
            return None;
        }
        let (stamp, tail) = rest.split_at(TIMESTAMP_LEN);
        let dataset = tail.strip_prefix('_')?;
        if dataset.is_empty() {
            return None;
        }
        Some(Self {
            created: parse_stamp(stamp)?,
            dataset: dataset.to_string(),
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn file_name(&self) -> String {
        format!(
            "{ARTIFACT_PREFIX}{}_{}{ARTIFACT_SUFFIX}",
            self.created.format(TIMESTAMP_FORMAT),
            self.dataset
        )
    }

    /// Remote object key: `<client>/<dataset>/<year>/<month>/<file name>`.
    pub fn remote_key(&self, client_id: &str) -> String {
        format!(
            "{}/{}/{:04}/{:02}/{}",
            client_id,
            self.dataset,
            self.created.year(),
            self.created.month(),
            self.file_name()
        )
    }
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
