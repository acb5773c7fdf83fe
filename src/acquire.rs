use reqwest::Client;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::{
    config::Config,
    fetch::{
        files::{self, FileSource},
        sql::{self, SqlOutcome},
    },
    table::RowSet,
};

/// How a year's rows were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Api,
    FileCache,
    FileDownload,
}

/// One year's acquired rows, tagged with origin.
#[derive(Debug)]
pub struct YearData {
    pub year: u16,
    pub rows: RowSet,
    pub source: SourceKind,
}

/// Minimum spacing between successive years' remote activity. The portal
/// publishes no rate limit; one request a second keeps well clear of it.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Gate that enforces `MIN_REQUEST_INTERVAL` between calls to `wait`. The
/// first call never sleeps, and nothing waits after the last year.
pub struct Pacer {
    last: Option<Instant>,
}

impl Pacer {
    pub fn new() -> Self {
        Pacer { last: None }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquire one year. With a row cap the datastore SQL path is tried first;
/// without one it is skipped outright, since an uncapped query for a whole
/// year times out on the portal side. Either way the full-CSV fetch is the
/// fallback. `None` means the year contributes nothing and the run carries
/// on without it.
pub async fn acquire_year(
    client: &Client,
    cfg: &Config,
    year: u16,
    resource_id: &str,
    limit: Option<usize>,
) -> Option<YearData> {
    if let Some(limit) = limit {
        let query = sql::select_query(resource_id, limit);
        match sql::run_query(client, cfg, &query).await {
            SqlOutcome::Rows(rows) => {
                info!(year, rows = rows.len(), "acquired via datastore API");
                return Some(YearData {
                    year,
                    rows,
                    source: SourceKind::Api,
                });
            }
            SqlOutcome::Empty => {
                info!(year, "API returned no rows, falling back to full CSV");
            }
            SqlOutcome::Failed(reason) => {
                warn!(year, %reason, "API query failed, falling back to full CSV");
            }
        }
    }

    match files::fetch_year_csv(client, cfg, year).await {
        Ok((mut rows, file_source)) => {
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            if rows.is_empty() {
                warn!(year, "fetched CSV held no rows");
                return None;
            }
            let source = match file_source {
                FileSource::Cache => SourceKind::FileCache,
                FileSource::Download => SourceKind::FileDownload,
            };
            info!(year, rows = rows.len(), ?source, "acquired via file");
            Some(YearData { year, rows, source })
        }
        Err(e) => {
            warn!(year, error = %format!("{e:#}"), "file fetch failed");
            None
        }
    }
}

/// Walk every configured year in chronological order, lower-case each
/// result's columns, tag the origin year, and merge everything with
/// outer-join column alignment. A failed year is logged and skipped; if
/// every year fails the result is an empty dataset, not an error.
pub async fn acquire_all_years(
    client: &Client,
    cfg: &Config,
    limit_per_year: Option<usize>,
) -> RowSet {
    let mut parts = Vec::with_capacity(cfg.api.resources.len());
    let mut pacer = Pacer::new();

    for (&year, resource_id) in &cfg.api.resources {
        pacer.wait().await;
        match acquire_year(client, cfg, year, resource_id, limit_per_year).await {
            Some(mut data) => {
                data.rows.lowercase_columns();
                data.rows.tag_origin_year(year);
                parts.push(data.rows);
            }
            None => info!(year, "year contributes no data"),
        }
    }

    if parts.is_empty() {
        warn!("every configured year failed or was empty");
        return RowSet::default();
    }
    RowSet::concat_outer(parts)
}
