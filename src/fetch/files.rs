use anyhow::{Context, Result};
use encoding_rs::WINDOWS_1252;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};

use crate::{config::Config, table::RowSet};

/// Whether a year's CSV came off disk or over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    Cache,
    Download,
}

/// Fetch one year's full CSV, preferring the local cache. Cache hits are
/// existence-only; nothing re-checks the remote once a file is on disk.
pub async fn fetch_year_csv(
    client: &Client,
    cfg: &Config,
    year: u16,
) -> Result<(RowSet, FileSource)> {
    let cache_path = cfg.cache_path(year);
    if fs::try_exists(&cache_path).await? {
        info!(year, path = %cache_path.display(), "cache hit");
        let rows = parse_csv_file(&cache_path).await?;
        return Ok((rows, FileSource::Cache));
    }

    let url = cfg.csv_url(year);
    info!(year, %url, "cache miss, downloading full CSV");
    download_to(client, &url, &cache_path)
        .await
        .with_context(|| format!("downloading {url}"))?;
    let rows = parse_csv_file(&cache_path).await?;
    Ok((rows, FileSource::Download))
}

/// Stream `url` to `dest` in chunks. The body goes to a `.part` file that is
/// renamed into place only once the stream completes, so an aborted transfer
/// never shows up as a cache hit on the next run.
async fn download_to(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = dest.with_extension("csv.part");
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("creating `{}`", tmp_path.display()))?;
    let mut stream = resp.bytes_stream();
    let copied: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = copied {
        drop(file);
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    fs::rename(&tmp_path, dest)
        .await
        .with_context(|| format!("renaming `{}` into place", tmp_path.display()))?;
    Ok(())
}

async fn parse_csv_file(path: &Path) -> Result<RowSet> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading `{}`", path.display()))?;
    let text = decode_text(&bytes)?;
    RowSet::from_csv(&text).with_context(|| format!("parsing CSV `{}`", path.display()))
}

/// Yearly dumps are usually UTF-8, but some ship as Windows-1252. Try UTF-8
/// first and fall back once.
fn decode_text(bytes: &[u8]) -> Result<String> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            warn!("file is not valid UTF-8, retrying as Windows-1252");
            let (text, _, had_errors) = WINDOWS_1252.decode(bytes);
            if had_errors {
                anyhow::bail!("file decodable as neither UTF-8 nor Windows-1252");
            }
            Ok(text.into_owned())
        }
    }
}
