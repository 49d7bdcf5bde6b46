// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use async_std::fs;
use fs4::async_std::AsyncFileExt;
use futures::future::try_join_all;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, StatusCode,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use super::{raw, Category, ControlledVocabularySet, LoadError, RawCvFiles};
use crate::{settings::Settings, tools};

/// Where `gh:<ref>` sources point to.
pub const GITHUB_RAW_ROOT: &str = "https://raw.githubusercontent.com/PCMDI/input4MIPs_CVs/";

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: u64 = 10000;

/// A reference to a specific version of the CVs.
///
/// ```
/// # use input4mips_validation::cvs::CvSource;
/// let source: CvSource = "gh:v6.5.0".parse().unwrap();
/// assert_eq!(
///     source.to_string(),
///     "https://raw.githubusercontent.com/PCMDI/input4MIPs_CVs/v6.5.0/"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CvSource {
    /// Root URL under which all the CV files are found.
    Remote(Url),
    /// Local directory holding all the CV files.
    Local(PathBuf),
}

impl CvSource {
    /// Parses a CV source reference:
    ///
    /// - `gh:<git-ref>` -> the official CVs repository at that branch, tag or commit
    /// - an `http(s)://` URL -> remote root
    /// - anything else -> local directory
    ///
    /// # Errors
    ///
    /// If the reference is empty or malformed.
    pub fn parse(reference: &str) -> Result<Self, LoadError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LoadError::NoSource);
        }
        if let Some(git_ref) = reference.strip_prefix("gh:") {
            if git_ref.is_empty() || git_ref.ends_with('/') {
                return Err(LoadError::InvalidSource(reference.to_owned()));
            }
            return Url::parse(&format!("{GITHUB_RAW_ROOT}{git_ref}/"))
                .map(Self::Remote)
                .map_err(|_err| LoadError::InvalidSource(reference.to_owned()));
        }
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let mut url = url;
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                Ok(Self::Remote(url))
            }
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|()| LoadError::InvalidSource(reference.to_owned())),
            _ => Ok(Self::Local(PathBuf::from(reference))),
        }
    }

    /// # Errors
    ///
    /// If no source is configured, or it is malformed.
    pub fn from_settings(settings: &Settings) -> Result<Self, LoadError> {
        settings
            .input4mips_cv_source
            .as_deref()
            .ok_or(LoadError::NoSource)
            .and_then(Self::parse)
    }
}

impl FromStr for CvSource {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(dir) => write!(f, "{}", dir.display()),
        }
    }
}

#[derive(Error, Debug)]
enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("failed to read the response body: {0}")]
    Body(#[from] reqwest::Error),
    #[error("server responded with {0}")]
    Status(StatusCode),
    #[error("invalid file URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Creates a new [`reqwest::Client`] with the supplied retry and timeout settings.
/// @param retries Number of retries for a single fetch
/// @param timeout Total timeout per request in milliseconds (ms)
fn create_downloader(
    retries: u32,
    timeout: u64,
    headers: Option<HeaderMap>,
) -> Result<ClientWithMiddleware, reqwest::Error> {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(retries);
    let mut client_builder = Client::builder().timeout(Duration::from_millis(timeout));
    if let Some(headers_val) = headers {
        client_builder = client_builder.default_headers(headers_val);
    }
    Ok(ClientBuilder::new(client_builder.build()?)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

fn create_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(user_agent).unwrap_or_else(|_err| {
        tracing::warn!("Invalid user agent '{user_agent}'; using the default one");
        HeaderValue::from_static(tools::DEFAULT_USER_AGENT)
    });
    headers.insert(header::USER_AGENT, value);
    headers
}

/// All the CV file names we try to load, required ones first.
fn all_file_names() -> Vec<(String, bool)> {
    raw::REQUIRED_FILES
        .iter()
        .map(|name| ((*name).to_owned(), true))
        .chain(
            Category::iter()
                .filter_map(Category::simple_vocabulary_filename)
                .map(|name| (name, false)),
        )
        .collect()
}

/// Loads CVs from local directories or remote roots,
/// caching remote files on disk.
#[derive(Debug)]
pub struct CvLoader {
    cache_dir: PathBuf,
    downloader: ClientWithMiddleware,
}

impl CvLoader {
    /// # Errors
    ///
    /// If the HTTP client can not be created.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        user_agent: &str,
        retries: u32,
        timeout: u64,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            cache_dir: cache_dir.into(),
            downloader: create_downloader(retries, timeout, Some(create_headers(user_agent)))?,
        })
    }

    /// # Errors
    ///
    /// If the HTTP client can not be created.
    pub fn from_settings(settings: &Settings) -> Result<Self, LoadError> {
        Self::new(
            &settings.cache_dir,
            &settings.user_agent,
            settings.retries,
            settings.timeout,
        )
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the files of a remote source get cached.
    #[must_use]
    pub fn cache_dir_for(&self, root: &Url) -> PathBuf {
        self.cache_dir.join(tools::url_encode(root.as_str()).as_ref())
    }

    /// Loads a complete CV set.
    ///
    /// Remote files come from the cache if present,
    /// unless `force_download` is set.
    /// If a download fails, a cached copy is used if there is one.
    ///
    /// # Errors
    ///
    /// - [`LoadError::SourceUnavailable`] if a required file
    ///   can neither be fetched nor found in the cache
    /// - [`LoadError::Parse`] if a file does not have the expected structure
    #[instrument(skip(self))]
    pub async fn load(
        &self,
        source: &CvSource,
        force_download: bool,
    ) -> Result<ControlledVocabularySet, LoadError> {
        tracing::info!("Loading CVs from '{source}' ...");
        let names = all_file_names();
        let fetched = try_join_all(names.iter().map(|(name, required)| async move {
            let content = match source {
                CvSource::Local(dir) => Self::read_local(source, dir, name, *required).await?,
                CvSource::Remote(root) => {
                    self.fetch_remote(source, root, name, *required, force_download)
                        .await?
                }
            };
            Ok::<_, LoadError>(content.map(|content| (name.clone(), content)))
        }))
        .await?;
        let files: RawCvFiles = fetched.into_iter().flatten().collect();
        ControlledVocabularySet::from_raw(&source.to_string(), &files)
    }

    async fn read_local(
        source: &CvSource,
        dir: &Path,
        name: &str,
        required: bool,
    ) -> Result<Option<Vec<u8>>, LoadError> {
        let file = dir.join(name);
        match fs::read(&file).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LoadError::SourceUnavailable {
                source_ref: source.to_string(),
                file: name.to_owned(),
                reason: err.to_string(),
            }),
        }
    }

    async fn fetch_remote(
        &self,
        source: &CvSource,
        root: &Url,
        name: &str,
        required: bool,
        force_download: bool,
    ) -> Result<Option<Vec<u8>>, LoadError> {
        let cache_dir = self.cache_dir_for(root);
        let cache_file = cache_dir.join(name);
        let cached = cache_file.is_file();
        if cached && !force_download {
            tracing::debug!("Using cached CV file '{}'", cache_file.display());
            return Self::read_cache(source, &cache_file, name).await.map(Some);
        }

        match self.download(root, name).await {
            Ok(Some(content)) => {
                if let Err(err) = Self::write_cache(&cache_dir, name, &content).await {
                    tracing::warn!(
                        "Failed to cache CV file '{name}' in '{}': {err}",
                        cache_dir.display()
                    );
                }
                Ok(Some(content))
            }
            Ok(None) if !required => {
                tracing::debug!("Optional CV file '{name}' does not exist in '{root}'");
                Ok(None)
            }
            Ok(None) => Err(LoadError::SourceUnavailable {
                source_ref: source.to_string(),
                file: name.to_owned(),
                reason: "not found".to_owned(),
            }),
            Err(err) if cached => {
                tracing::warn!("Failed to download CV file '{name}' ({err}); using the cached copy");
                Self::read_cache(source, &cache_file, name).await.map(Some)
            }
            Err(err) if !required => {
                tracing::warn!("Failed to download optional CV file '{name}': {err}");
                Ok(None)
            }
            Err(err) => Err(LoadError::SourceUnavailable {
                source_ref: source.to_string(),
                file: name.to_owned(),
                reason: err.to_string(),
            }),
        }
    }

    /// Returns `None` if the server says the file does not exist.
    async fn download(&self, root: &Url, name: &str) -> Result<Option<Vec<u8>>, DownloadError> {
        let url = root.join(name)?;
        tracing::debug!("Downloading '{url}' ...");
        let response = self.downloader.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(DownloadError::Status(status)),
        }
    }

    async fn read_cache(
        source: &CvSource,
        cache_file: &Path,
        name: &str,
    ) -> Result<Vec<u8>, LoadError> {
        fs::read(cache_file)
            .await
            .map_err(|err| LoadError::SourceUnavailable {
                source_ref: source.to_string(),
                file: name.to_owned(),
                reason: format!("failed to read cache '{}': {err}", cache_file.display()),
            })
    }

    async fn write_cache(cache_dir: &Path, name: &str, content: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(cache_dir).await?;
        let lock_file_path = cache_dir.join(format!("{name}.lock"));
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file_path)
            .await?;
        tracing::trace!("Locking '{}' ...", lock_file_path.display());
        lock_file.lock_exclusive()?;
        let temp_file = cache_dir.join(format!("{name}.temp"));
        let written = async {
            fs::write(&temp_file, content).await?;
            fs::rename(&temp_file, cache_dir.join(name)).await
        }
        .await;
        lock_file.unlock()?;
        tracing::trace!("Released lock on '{}'.", lock_file_path.display());
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvs::test_support::raw_test_cvs;

    fn write_cvs(dir: &Path) {
        for (name, content) in raw_test_cvs() {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(
            CvSource::parse("gh:main").unwrap(),
            CvSource::Remote(
                Url::parse("https://raw.githubusercontent.com/PCMDI/input4MIPs_CVs/main/")
                    .unwrap()
            )
        );
        assert_eq!(
            CvSource::parse("https://example.invalid/cvs").unwrap(),
            CvSource::Remote(Url::parse("https://example.invalid/cvs/").unwrap())
        );
        assert_eq!(
            CvSource::parse("some/dir").unwrap(),
            CvSource::Local(PathBuf::from("some/dir"))
        );
        assert!(matches!(CvSource::parse("  "), Err(LoadError::NoSource)));
        assert!(matches!(
            CvSource::parse("gh:"),
            Err(LoadError::InvalidSource(_))
        ));
    }

    #[tokio::test]
    async fn test_load_local() {
        let dir = tempfile::tempdir().unwrap();
        write_cvs(dir.path());
        let cache = tempfile::tempdir().unwrap();
        let loader = CvLoader::new(cache.path(), tools::DEFAULT_USER_AGENT, 0, 1000).unwrap();
        let source = CvSource::Local(dir.path().to_path_buf());
        let cvs = loader.load(&source, false).await.unwrap();
        assert!(cvs.source_id_entry("CR-CMIP-0-2-0").is_some());
        assert_eq!(cvs.version().source, dir.path().display().to_string());
    }

    #[tokio::test]
    async fn test_load_local_missing_required() {
        let dir = tempfile::tempdir().unwrap();
        write_cvs(dir.path());
        std::fs::remove_file(dir.path().join(raw::SOURCE_ID_FILENAME)).unwrap();
        let cache = tempfile::tempdir().unwrap();
        let loader = CvLoader::new(cache.path(), tools::DEFAULT_USER_AGENT, 0, 1000).unwrap();
        let res = loader
            .load(&CvSource::Local(dir.path().to_path_buf()), false)
            .await;
        assert!(matches!(res, Err(LoadError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_remote_served_from_cache() {
        let cache = tempfile::tempdir().unwrap();
        let loader = CvLoader::new(cache.path(), tools::DEFAULT_USER_AGENT, 0, 500).unwrap();
        // nothing listens here, so only the cache can serve it
        let root = Url::parse("http://127.0.0.1:9/cvs/").unwrap();
        let cache_dir = loader.cache_dir_for(&root);
        std::fs::create_dir_all(&cache_dir).unwrap();
        write_cvs(&cache_dir);

        let source = CvSource::Remote(root);
        assert!(loader.load(&source, false).await.is_ok());
        // the failed forced download falls back to the cache too
        assert!(loader.load(&source, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_remote_unavailable_without_cache() {
        let cache = tempfile::tempdir().unwrap();
        let loader = CvLoader::new(cache.path(), tools::DEFAULT_USER_AGENT, 0, 500).unwrap();
        let source = CvSource::Remote(Url::parse("http://127.0.0.1:9/cvs/").unwrap());
        let res = loader.load(&source, false).await;
        assert!(matches!(res, Err(LoadError::SourceUnavailable { .. })));
    }
}
