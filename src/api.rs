// API client module: a small blocking HTTP client for the Luma capture API.
// It resolves the API key (memory, credential file, then an injected
// resolver), attaches it to every call and turns responses into typed
// records from `models`.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::{self, CaptureInput};
use crate::credentials::{self, CredentialRecord, CredentialStore};
use crate::error::{LumaError, Result};
use crate::models::{CameraType, CaptureInfo, CaptureLocation, CreditInfo, PrivacyLevel};

pub const DEFAULT_BASE_URL: &str = "https://webapp.engineeringlumalabs.com/api/v2/";
/// Where users obtain API keys.
pub const DASHBOARD_URL: &str = "https://captures.lumalabs.ai/dashboard";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_TRIGGER_DELAY_MS: u64 = 500;
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Connection settings for [`LumaClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint override; `None` talks to [`DEFAULT_BASE_URL`].
    pub base_url: Option<Url>,
    /// Applied to every API call.
    pub timeout: Duration,
    /// Applied to the payload transfer, which can take much longer.
    pub upload_timeout: Duration,
    /// Pause between uploading a payload and triggering processing.
    pub trigger_delay: Duration,
    /// Read and persist the API key in the credential file.
    pub use_cache: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            trigger_delay: Duration::from_millis(DEFAULT_TRIGGER_DELAY_MS),
            use_cache: true,
        }
    }
}

impl ClientConfig {
    /// Configuration from the environment: `LUMA_API_URL` overrides the
    /// default endpoint.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("LUMA_API_URL") {
            config = config.with_base_url(&raw)?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|err| LumaError::Config(format!("invalid base URL {raw:?}: {err}")))?;
        if url.cannot_be_a_base() {
            return Err(LumaError::Config(format!("{raw:?} cannot be used as a base URL")));
        }
        self.base_url = Some(normalize_base_url(url));
        Ok(self)
    }

    /// The endpoint requests are built on.
    pub fn base_url(&self) -> Result<Url> {
        match &self.base_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(DEFAULT_BASE_URL)
                .map_err(|err| LumaError::Config(format!("invalid default base URL: {err}"))),
        }
    }
}

fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Supplies an API key when none is known yet. Returning `Ok(None)` means
/// "no key available" and surfaces as an authentication error.
pub trait CredentialResolver {
    fn resolve(&self) -> Result<Option<String>>;
}

impl<F> CredentialResolver for F
where
    F: Fn() -> Result<Option<String>>,
{
    fn resolve(&self) -> Result<Option<String>> {
        self()
    }
}

/// Resolver that never has a key; used for non-interactive library use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl CredentialResolver for NoPrompt {
    fn resolve(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Metadata sent with a new capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub title: String,
    pub camera: CameraType,
    pub privacy: Option<PrivacyLevel>,
    pub location: Option<CaptureLocation>,
}

impl Submission {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            camera: CameraType::default(),
            privacy: None,
            location: None,
        }
    }

    pub fn camera(mut self, camera: CameraType) -> Self {
        self.camera = camera;
        self
    }

    pub fn privacy(mut self, privacy: PrivacyLevel) -> Self {
        self.privacy = Some(privacy);
        self
    }

    pub fn location(mut self, location: CaptureLocation) -> Self {
        self.location = Some(location);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(LumaError::InvalidInput("capture title cannot be empty".into()));
        }
        if let Some(privacy) = &self.privacy {
            if privacy.is_unknown() {
                return Err(LumaError::InvalidInput(format!(
                    "unsupported privacy level {privacy:?}"
                )));
            }
        }
        Ok(())
    }

    fn form_fields(&self) -> Result<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("title", self.title.trim().to_string()),
            ("camModel", self.camera.as_str().to_string()),
        ];
        if let Some(privacy) = &self.privacy {
            fields.push(("privacy", privacy.as_str().to_string()));
        }
        if let Some(location) = &self.location {
            let encoded = serde_json::to_string(location)
                .map_err(|err| LumaError::InvalidInput(format!("invalid location: {err}")))?;
            fields.push(("location", encoded));
        }
        Ok(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest first.
    #[default]
    Desc,
    Asc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        }
    }
}

/// Parameters for searching the caller's captures by title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Title filter; empty lists every capture.
    pub title: String,
    /// Index of the first capture to return.
    pub skip: u32,
    /// Captures requested per page.
    pub page_size: u32,
    pub order: SortOrder,
    /// Stop after this many captures.
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            skip: 0,
            page_size: DEFAULT_PAGE_SIZE,
            order: SortOrder::Desc,
            limit: None,
        }
    }
}

/// Capture creation response.
#[derive(Debug, Deserialize)]
struct CreatedCapture {
    capture: CreatedSlug,
    #[serde(rename = "signedUrls")]
    signed_urls: SignedUrls,
}

#[derive(Debug, Deserialize)]
struct CreatedSlug {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrls {
    source: String,
}

#[derive(Debug, Deserialize)]
struct CapturePage {
    captures: Vec<Value>,
}

/// Payload waiting to be uploaded.
enum Payload {
    File { file: File, len: u64 },
    Bytes(Vec<u8>),
}

/// Blocking client for the Luma capture API.
///
/// Each instance owns its key and HTTP connection pool; give every thread
/// its own client if calls need to run concurrently.
pub struct LumaClient {
    http: Client,
    config: ClientConfig,
    store: Option<CredentialStore>,
    resolver: Box<dyn CredentialResolver>,
    api_key: Option<String>,
    show_progress: bool,
}

impl LumaClient {
    /// Build a client. The credential file of the current user is used when
    /// `config.use_cache` is set.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store = if config.use_cache {
            Some(CredentialStore::for_current_user()?)
        } else {
            None
        };
        let http = Client::builder()
            .user_agent(format!("luma-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(LumaError::Transport)?;
        Ok(Self {
            http,
            config,
            store,
            resolver: Box::new(NoPrompt),
            api_key: None,
            show_progress: false,
        })
    }

    /// Client configured by `ClientConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Replace the credential store (or disable it with `None`).
    pub fn with_store(mut self, store: Option<CredentialStore>) -> Self {
        self.store = store;
        self
    }

    /// Strategy used to obtain a key when none is stored.
    pub fn with_resolver(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Use `api_key` for this session without validating or persisting it.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into().trim().to_string());
        self
    }

    /// Draw a progress bar on stderr while uploading.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&CredentialStore> {
        self.store.as_ref()
    }

    /// Returns whether a key is already loaded in memory.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check `api_key` against the server and, if accepted, remember and
    /// persist it. A rejected key leaves the stored credential untouched.
    pub fn authenticate(&mut self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LumaError::Authentication("API key cannot be empty".into()));
        }
        if HeaderValue::from_str(&credentials::header_value(api_key)).is_err() {
            return Err(LumaError::Authentication(
                "API key contains characters that cannot be sent in a header".into(),
            ));
        }

        info!("verifying API key");
        self.fetch_credits(api_key)?;

        if let Some(store) = &self.store {
            store.save(&CredentialRecord::new(api_key))?;
            info!(path = %store.path().display(), "saved API key");
        }
        self.api_key = Some(api_key.to_string());
        Ok(())
    }

    /// Resolve a key now, prompting through the resolver if needed.
    pub fn ensure_authenticated(&mut self) -> Result<()> {
        self.resolve_api_key().map(|_| ())
    }

    /// Forget the key and delete the credential file. Returns whether a file
    /// was removed.
    pub fn clear_auth(&mut self) -> Result<bool> {
        self.api_key = None;
        match &self.store {
            Some(store) => Ok(store.clear()?),
            None => Ok(false),
        }
    }

    /// Current credit balance.
    pub fn credits(&mut self) -> Result<CreditInfo> {
        self.with_auth(|client, key| client.fetch_credits(key))
    }

    /// Current state of the capture identified by `slug`.
    pub fn status(&mut self, slug: &str) -> Result<CaptureInfo> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(LumaError::InvalidInput("slug cannot be empty".into()));
        }
        self.with_auth(|client, key| client.fetch_capture(key, slug))
    }

    /// Search the caller's captures by title.
    pub fn get(&mut self, title: &str) -> Result<CaptureSearch<'_>> {
        self.search(SearchQuery::new(title))
    }

    /// Search with explicit paging. The first page is fetched before this
    /// returns; later pages are fetched as the iterator advances.
    pub fn search(&mut self, query: SearchQuery) -> Result<CaptureSearch<'_>> {
        if query.page_size == 0 {
            return Err(LumaError::InvalidInput("page size must be at least 1".into()));
        }
        let first = self.with_auth(|client, key| client.fetch_page(key, &query, query.skip))?;
        let api_key = self.api_key.clone().unwrap_or_default();
        let mut search = CaptureSearch {
            client: self,
            api_key,
            skip: query.skip,
            query,
            buffered: VecDeque::new(),
            previous_page: Vec::new(),
            yielded: 0,
            exhausted: false,
        };
        search.accept_page(first);
        Ok(search)
    }

    /// Submit a video, a zip or a directory of images for processing and
    /// return the new capture's slug.
    pub fn submit(&mut self, path: impl AsRef<Path>, submission: &Submission) -> Result<String> {
        submission.validate()?;
        let input = archive::detect_input(path.as_ref())?;

        // Keeps the temporary zip alive until the upload finished.
        let mut _archive = None;
        let upload_path = match &input {
            CaptureInput::ImageDirectory { path, media_files } => {
                info!(dir = %path.display(), media_files, "compressing directory");
                let tmp = archive::archive_directory(path)?;
                let tmp_path = tmp.path().to_path_buf();
                _archive = Some(tmp);
                tmp_path
            }
            other => other.path().to_path_buf(),
        };

        let file = File::open(&upload_path).map_err(|err| LumaError::io(&upload_path, err))?;
        let len = file
            .metadata()
            .map_err(|err| LumaError::io(&upload_path, err))?
            .len();
        self.submit_payload(Payload::File { file, len }, submission)
    }

    /// Submit an in-memory video or zip.
    pub fn submit_bytes(&mut self, payload: Vec<u8>, submission: &Submission) -> Result<String> {
        submission.validate()?;
        if payload.is_empty() {
            return Err(LumaError::InvalidInput("payload is empty".into()));
        }
        self.submit_payload(Payload::Bytes(payload), submission)
    }

    fn submit_payload(&mut self, payload: Payload, submission: &Submission) -> Result<String> {
        let created = self
            .with_auth(|client, key| client.create_capture(key, submission))
            .map_err(|err| transport_as_upload(err, "failed to create capture"))?;
        let slug = created.capture.slug;
        info!(%slug, "created capture");

        self.upload(&created.signed_urls.source, payload)?;

        if !self.config.trigger_delay.is_zero() {
            thread::sleep(self.config.trigger_delay);
        }
        self.with_auth(|client, key| client.trigger(key, &slug))
            .map_err(|err| transport_as_upload(err, "failed to start processing"))?;
        info!(%slug, "submitted capture");
        Ok(slug)
    }

    /// Run `op` with a key. A stored key that the server rejects gets one
    /// replacement from the resolver and one retry.
    fn with_auth<T>(&mut self, op: impl Fn(&Self, &str) -> Result<T>) -> Result<T> {
        let (key, fresh) = self.resolve_api_key()?;
        match op(&*self, &key) {
            Err(LumaError::Authentication(reason)) if !fresh => {
                warn!(%reason, "API key was rejected; asking for a new one");
                self.api_key = None;
                let key = self.prompt_for_key()?;
                op(&*self, &key)
            }
            result => result,
        }
    }

    /// Returns the key and whether it was just obtained from the resolver.
    fn resolve_api_key(&mut self) -> Result<(String, bool)> {
        if let Some(key) = &self.api_key {
            return Ok((key.clone(), false));
        }
        if let Some(record) = self.load_stored() {
            self.api_key = Some(record.api_key.clone());
            return Ok((record.api_key, false));
        }
        Ok((self.prompt_for_key()?, true))
    }

    fn load_stored(&self) -> Option<CredentialRecord> {
        let store = self.store.as_ref()?;
        match store.load() {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable credential file");
                None
            }
        }
    }

    fn prompt_for_key(&mut self) -> Result<String> {
        let key = self.resolver.resolve()?.ok_or_else(|| {
            LumaError::Authentication(format!(
                "no API key configured; run `luma auth <api-key>` (get one from {DASHBOARD_URL})"
            ))
        })?;
        self.authenticate(&key)?;
        Ok(key.trim().to_string())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.base_url()?;
        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|_| LumaError::Config(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.header(AUTHORIZATION, credentials::header_value(api_key))
    }

    fn fetch_credits(&self, api_key: &str) -> Result<CreditInfo> {
        let url = self.endpoint(&["capture", "credits"])?;
        let response = send(self.authorized(self.http.get(url), api_key))?;
        CreditInfo::from_json(read_json(check_status(response, None)?)?)
    }

    fn fetch_capture(&self, api_key: &str, slug: &str) -> Result<CaptureInfo> {
        let url = self.endpoint(&["capture", slug])?;
        let response = send(self.authorized(self.http.get(url), api_key))?;
        CaptureInfo::from_json(read_json(check_status(response, Some(slug))?)?)
    }

    fn fetch_page(&self, api_key: &str, query: &SearchQuery, skip: u32) -> Result<Vec<CaptureInfo>> {
        let mut url = self.endpoint(&["capture"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.title.is_empty() {
                pairs.append_pair("search", &query.title);
            }
            pairs
                .append_pair("skip", &skip.to_string())
                .append_pair("take", &query.page_size.to_string())
                .append_pair("order", query.order.as_str());
        }
        debug!(%url, "fetching capture page");
        let response = send(self.authorized(self.http.get(url), api_key))?;
        let page: CapturePage = serde_json::from_value(read_json(check_status(response, None)?)?)
            .map_err(|err| LumaError::MalformedResponse(format!("capture list: {err}")))?;
        page.captures.into_iter().map(CaptureInfo::from_json).collect()
    }

    fn create_capture(&self, api_key: &str, submission: &Submission) -> Result<CreatedCapture> {
        let url = self.endpoint(&["capture"])?;
        let request = self.http.post(url).form(&submission.form_fields()?);
        let response = send(self.authorized(request, api_key))?;
        let created: CreatedCapture = serde_json::from_value(read_json(check_status(response, None)?)?)
            .map_err(|err| LumaError::MalformedResponse(format!("capture creation: {err}")))?;
        if created.capture.slug.trim().is_empty() {
            return Err(LumaError::MalformedResponse("server assigned an empty slug".into()));
        }
        if created.signed_urls.source.trim().is_empty() {
            return Err(LumaError::MalformedResponse("server returned no upload URL".into()));
        }
        Ok(created)
    }

    /// PUT the payload to the signed URL. No auth header: the URL itself is
    /// the credential.
    fn upload(&self, upload_url: &str, payload: Payload) -> Result<()> {
        let url = Url::parse(upload_url)
            .map_err(|err| LumaError::MalformedResponse(format!("invalid upload URL: {err}")))?;
        let bar = self.progress_bar(&payload);
        let body = match payload {
            Payload::File { file, len } => Body::sized(bar.wrap_read(file), len),
            Payload::Bytes(bytes) => {
                bar.set_position(bytes.len() as u64);
                Body::from(bytes)
            }
        };

        let result = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "text/plain")
            .timeout(self.config.upload_timeout)
            .body(body)
            .send();
        bar.finish_and_clear();

        let response = result.map_err(|err| LumaError::Upload {
            message: "failed to transfer capture payload".into(),
            source: Some(err),
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(LumaError::Upload {
                message: format!("storage rejected the payload with status {status}: {body}"),
                source: None,
            });
        }
        Ok(())
    }

    fn trigger(&self, api_key: &str, slug: &str) -> Result<()> {
        let url = self.endpoint(&["capture", slug])?;
        let response = send(self.authorized(self.http.post(url), api_key))?;
        check_status(response, None)?;
        Ok(())
    }

    fn progress_bar(&self, payload: &Payload) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let len = match payload {
            Payload::File { len, .. } => *len,
            Payload::Bytes(bytes) => bytes.len() as u64,
        };
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} Uploading [{bar:30}] {bytes}/{total_bytes} ({eta})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Lazy, single-pass iterator over search results. Further pages are
/// requested with the key the search started with.
pub struct CaptureSearch<'a> {
    client: &'a LumaClient,
    api_key: String,
    query: SearchQuery,
    skip: u32,
    buffered: VecDeque<CaptureInfo>,
    /// Slugs of the last page fetched.
    previous_page: Vec<String>,
    yielded: usize,
    exhausted: bool,
}

impl CaptureSearch<'_> {
    fn accept_page(&mut self, page: Vec<CaptureInfo>) {
        let slugs: Vec<String> = page.iter().map(|capture| capture.slug.clone()).collect();
        // A server that ignores `skip` keeps sending the same page.
        if !slugs.is_empty() && slugs == self.previous_page {
            warn!(skip = self.skip, "server repeated the previous page; stopping search");
            self.exhausted = true;
            return;
        }
        self.previous_page = slugs;

        // A short page is the last one.
        if page.len() < self.query.page_size as usize {
            self.exhausted = true;
        }
        self.skip = self.skip.saturating_add(page.len() as u32);
        self.buffered.extend(page);
    }

    fn limit_reached(&self) -> bool {
        self.query.limit.is_some_and(|limit| self.yielded >= limit)
    }
}

impl Iterator for CaptureSearch<'_> {
    type Item = Result<CaptureInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit_reached() {
                return None;
            }
            if let Some(capture) = self.buffered.pop_front() {
                self.yielded += 1;
                return Some(Ok(capture));
            }
            if self.exhausted {
                return None;
            }
            match self.client.fetch_page(&self.api_key, &self.query, self.skip) {
                Ok(page) => self.accept_page(page),
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Network failures while submitting are reported as upload failures.
fn transport_as_upload(err: LumaError, step: &str) -> LumaError {
    match err {
        LumaError::Transport(source) => LumaError::Upload {
            message: step.to_string(),
            source: Some(source),
        },
        other => other,
    }
}

fn send(request: RequestBuilder) -> Result<Response> {
    request.send().map_err(LumaError::Transport)
}

/// Map non-success statuses onto the error taxonomy. `slug` names the
/// capture a 404 refers to.
fn check_status(response: Response, slug: Option<&str>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .unwrap_or_else(|_| String::from("unable to read error body"));
    debug!(%status, %message, "request failed");
    match (status, slug) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => Err(LumaError::Authentication(
            format!("API key was rejected ({status}); get a valid key from {DASHBOARD_URL}"),
        )),
        (StatusCode::NOT_FOUND, Some(slug)) => Err(LumaError::NotFound(slug.to_string())),
        _ => Err(LumaError::Server { status, message }),
    }
}

fn read_json(response: Response) -> Result<Value> {
    let body = response.text().map_err(LumaError::Transport)?;
    serde_json::from_str(&body).map_err(|err| {
        LumaError::MalformedResponse(format!("invalid JSON ({err}): {}", truncate(&body, 200)))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
