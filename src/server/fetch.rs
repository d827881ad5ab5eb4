//! fetch.rs
//! Conditional GET (ETag / Last-Modified) for periodically polled feeds.

use anyhow::Result;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};

#[derive(Default, Clone, Debug)]
pub struct CacheCtl {
    pub etag: Option<String>,
    pub last_mod: Option<String>,
}

impl CacheCtl {
    pub fn clear(&mut self) {
        self.etag = None;
        self.last_mod = None;
    }
}

/// `Ok(None)` when the server answers 304 Not Modified.
pub async fn get_with_cache(client: &Client, url: &str, cache: &mut CacheCtl) -> Result<Option<Bytes>> {
    let mut req = client.get(url);
    if let Some(et) = &cache.etag {
        req = req.header(header::IF_NONE_MATCH, et);
    }
    if let Some(lm) = &cache.last_mod {
        req = req.header(header::IF_MODIFIED_SINCE, lm);
    }
    let resp = req.send().await?;
    match resp.status() {
        StatusCode::NOT_MODIFIED => Ok(None),
        StatusCode::OK => {
            let hdr = |name: header::HeaderName| {
                resp.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
            };
            cache.etag = hdr(header::ETAG);
            cache.last_mod = hdr(header::LAST_MODIFIED);
            Ok(Some(resp.bytes().await?))
        }
        s => anyhow::bail!("HTTP {} from {}", s, url),
    }
}
