use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Run settings, loaded once from `config/settings.yaml` and immutable after.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Portal root, e.g. `https://datos.cdmx.gob.mx`.
    pub base_url: String,
    pub endpoints: Endpoints,
    /// Year → datastore resource id. A `BTreeMap` keeps iteration chronological.
    pub resources: BTreeMap<u16, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    /// Relative path of the CKAN `datastore_search_sql` action.
    pub sql_search: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Host + path holding the full per-year CSV dumps.
    pub archive_url: String,
    /// Filename prefix shared by every yearly dump, e.g. `carpetas_completas`.
    pub file_prefix: String,
    /// Directory where downloaded CSVs are kept between runs.
    pub cache_dir: PathBuf,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file `{}`", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file `{}`", path.display()))?;
        if cfg.api.resources.is_empty() {
            anyhow::bail!(
                "config `{}` maps no years to resource ids",
                path.display()
            );
        }
        Ok(cfg)
    }

    /// Full URL of the datastore SQL endpoint.
    pub fn sql_url(&self) -> String {
        format!("{}{}", self.api.base_url, self.api.endpoints.sql_search)
    }

    /// Canonical bulk CSV URL for one year.
    pub fn csv_url(&self, year: u16) -> String {
        format!(
            "{}/{}_{}.csv",
            self.download.archive_url, self.download.file_prefix, year
        )
    }

    /// Local cache path for one year's CSV.
    pub fn cache_path(&self, year: u16) -> PathBuf {
        self.download
            .cache_dir
            .join(format!("{}_{}.csv", self.download.file_prefix, year))
    }
}
