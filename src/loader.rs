//! Library Loader: fetch a script or stylesheet from a primary location,
//! retrying once against a fallback.
//!
//! Locations are `http(s)://` URLs, `file://` URLs, or paths relative to the
//! configured static root (the local mirror of the CDN files). A successful
//! load inserts a [`HeadNode`] into the document before the caller is
//! notified.

use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    config::{AssetPair, LoaderSettings},
    document::{HeadNode, SharedDocument},
    error::{Error, Result},
};

/// How a loaded asset is used.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssetKind {
    /// Evaluated into the engine runtime.
    Script,
    /// Only inserted into the head.
    Stylesheet,
}

/// Where an asset is fetched from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetSource {
    /// Fetched over HTTP.
    Remote(Url),
    /// Read from disk.
    Local(PathBuf),
}

impl AssetSource {
    /// Classify `location`; anything that is not a URL is a path under
    /// `static_root`.
    pub fn parse(location: &str, static_root: &Path) -> Result<Self> {
        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|()| Error::asset_load(location, "not a local file url")),
                scheme => Err(Error::asset_load(
                    location,
                    format!("unsupported scheme `{scheme}`"),
                )),
            },
            Err(_) => Ok(Self::Local(
                static_root.join(location.trim_start_matches('/')),
            )),
        }
    }
}

/// One asset to load: the pair of locations and what to do with the body.
#[derive(Clone, Debug)]
pub struct LoadAttempt {
    /// Tried first.
    pub primary: String,
    /// Tried once if the primary fails.
    pub fallback: String,
    /// What the body is.
    pub kind: AssetKind,
}

impl LoadAttempt {
    /// A library script.
    pub fn script(pair: &AssetPair) -> Self {
        Self {
            primary: pair.primary.clone(),
            fallback: pair.fallback.clone(),
            kind: AssetKind::Script,
        }
    }

    /// A stylesheet.
    pub fn stylesheet(pair: &AssetPair) -> Self {
        Self {
            primary: pair.primary.clone(),
            fallback: pair.fallback.clone(),
            kind: AssetKind::Stylesheet,
        }
    }
}

/// A fetched asset.
#[derive(Clone, Debug)]
pub struct Asset {
    /// Location the body was actually read from.
    pub url: String,
    /// What the body is.
    pub kind: AssetKind,
    /// File contents.
    pub body: String,
}

/// Fetches assets and records them in the document head.
#[derive(Clone, Debug)]
pub struct Loader {
    document: SharedDocument,
    client: reqwest::Client,
    static_root: PathBuf,
}

impl Loader {
    /// Loader writing head nodes into `document`.
    pub fn new(document: SharedDocument, settings: &LoaderSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| Error::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            document,
            client,
            static_root: settings.static_root.clone(),
        })
    }

    /// Read the body at `location`.
    pub async fn fetch(&self, location: &str) -> Result<String> {
        match AssetSource::parse(location, &self.static_root)? {
            AssetSource::Remote(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|err| Error::asset_load(location, err))?;
                response
                    .text()
                    .await
                    .map_err(|err| Error::asset_load(location, err))
            }
            AssetSource::Local(path) => tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| Error::asset_load(location, err)),
        }
    }

    /// Fetch `attempt.primary`, falling back to `attempt.fallback` once. The
    /// head node is inserted before returning.
    pub async fn load_with_fallback(&self, attempt: &LoadAttempt) -> Result<Asset> {
        let (url, body) = match self.fetch(&attempt.primary).await {
            Ok(body) => (attempt.primary.clone(), body),
            Err(err) => {
                warn!(url = %attempt.primary, error = %err, "primary asset failed, trying fallback");
                match self.fetch(&attempt.fallback).await {
                    Ok(body) => (attempt.fallback.clone(), body),
                    Err(err) => {
                        error!(url = %attempt.fallback, error = %err, "fallback asset failed");
                        return Err(err);
                    }
                }
            }
        };

        let node = match attempt.kind {
            AssetKind::Script => HeadNode::Script(url.clone()),
            AssetKind::Stylesheet => HeadNode::Stylesheet(url.clone()),
        };
        self.document.borrow_mut().insert_head(node);
        debug!(url = %url, bytes = body.len(), "asset loaded");

        Ok(Asset {
            url,
            kind: attempt.kind,
            body,
        })
    }

    /// Fire-and-forget load. `on_ready` runs exactly once if either location
    /// succeeds and never if both fail. Must be called inside a `LocalSet`.
    pub fn load<F>(&self, attempt: LoadAttempt, on_ready: F) -> JoinHandle<()>
    where
        F: FnOnce(Asset) + 'static,
    {
        let loader = self.clone();
        tokio::task::spawn_local(async move {
            if let Ok(asset) = loader.load_with_fallback(&attempt).await {
                on_ready(asset);
            }
        })
    }
}
