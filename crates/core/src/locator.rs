use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::DatasetId;

pub const DEFAULT_SCHEME: &str = "cdf";

/// Shareable dataset address: `{scheme}://{host}/dataset/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocator {
    scheme: String,
    host: String,
    dataset_id: DatasetId,
}

impl DatasetLocator {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        dataset_id: DatasetId,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            dataset_id,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }
}

impl fmt::Display for DatasetLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/dataset/{}", self.scheme, self.host, self.dataset_id)
    }
}

impl FromStr for DatasetLocator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| CoreError::InvalidLocator(format!("missing scheme in {s:?}")))?;
        if scheme.is_empty() {
            return Err(CoreError::InvalidLocator(format!("empty scheme in {s:?}")));
        }

        let (host, path) = rest
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidLocator(format!("missing path in {s:?}")))?;
        if host.is_empty() {
            return Err(CoreError::InvalidLocator(format!("empty host in {s:?}")));
        }

        let id_part = path.strip_prefix("dataset/").ok_or_else(|| {
            CoreError::InvalidLocator(format!("expected /dataset/<id> path in {s:?}"))
        })?;
        let dataset_id = DatasetId::parse(id_part)
            .map_err(|_| CoreError::InvalidLocator(format!("malformed id in {s:?}")))?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            dataset_id,
        })
    }
}
