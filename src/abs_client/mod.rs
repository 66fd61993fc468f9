use serde::Deserialize;

#[derive(Clone, Debug)]
pub struct AbsClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AbsClient {
    /// Create a new client with the given base URL (e.g. "http://localhost:13378").
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(AbsClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client,
        })
    }

    /// Return a client with the provided API key set (Bearer)
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_header(&self) -> Option<(String, String)> {
        self.api_key
            .as_ref()
            .map(|k| ("Authorization".to_string(), format!("Bearer {}", k)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let mut req = self.client.get(url);
        if let Some((k, v)) = self.auth_header() {
            req = req.header(&k, &v);
        }
        let resp = req.send().await?;
        let status = resp.error_for_status()?;
        let body = status.text().await?;
        let parsed: T = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// GET /status (no auth required)
    pub async fn get_status(&self) -> anyhow::Result<StatusResponse> {
        self.get_json(&self.url("/status")).await
    }

    /// GET /api/libraries
    pub async fn get_libraries(&self) -> anyhow::Result<LibrariesResponse> {
        self.get_json(&self.url("/api/libraries")).await
    }

    /// GET /api/libraries/{lib_id}/items — one page.
    pub async fn get_library_items(
        &self,
        lib_id: &str,
        limit: i64,
        page: i64,
    ) -> anyhow::Result<LibraryItemsResponse> {
        let url = self.url(&format!("/api/libraries/{}/items", lib_id));
        let mut req = self.client.get(&url);
        if let Some((k, v)) = self.auth_header() {
            req = req.header(&k, &v);
        }
        let req = req.query(&[("limit", limit.to_string()), ("page", page.to_string())]);
        let resp = req.send().await?;
        let status = resp.error_for_status()?;
        let body = status.text().await?;
        let parsed: LibraryItemsResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// All items of a library, paging until exhausted.
    pub async fn list_all_library_items(&self, lib_id: &str) -> anyhow::Result<Vec<LibraryItem>> {
        const PAGE_SIZE: i64 = 200;
        let mut items = Vec::new();
        let mut page = 0;
        loop {
            let batch = self.get_library_items(lib_id, PAGE_SIZE, page).await?;
            let fetched = batch.results.len() as i64;
            items.extend(batch.results);
            if fetched < PAGE_SIZE || (items.len() as i64) >= batch.total {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// GET /api/me — the authenticated user, including per-item media progress.
    pub async fn get_me(&self) -> anyhow::Result<MeResponse> {
        self.get_json(&self.url("/api/me")).await
    }

    /// Build cover URL for an item. This returns a public URL and does not perform a request.
    pub fn cover_url(&self, item_id: &str) -> String {
        self.url(&format!("/api/items/{}/cover", item_id))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub app: Option<String>,
    #[serde(rename = "serverVersion")]
    pub server_version: Option<String>,
    #[serde(rename = "isInit")]
    pub is_init: Option<bool>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LibrariesResponse {
    pub libraries: Vec<Library>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Library {
    pub id: String,
    pub name: String,
    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LibraryItemsResponse {
    pub results: Vec<LibraryItem>,
    pub total: i64,
    pub limit: i64,
    pub page: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LibraryItem {
    pub id: String,
    #[serde(rename = "libraryId")]
    pub library_id: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<i64>,
    pub media: Option<Media>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Media {
    pub metadata: Option<MediaMetadata>,
    /// Total audio duration in seconds; absent for pure ebooks.
    pub duration: Option<f64>,
    #[serde(rename = "ebookFormat")]
    pub ebook_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    #[serde(rename = "authorName")]
    pub author_name: Option<String>,
    pub asin: Option<String>,
    pub isbn: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "seriesName")]
    pub series_name: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct MeResponse {
    pub id: String,
    pub username: Option<String>,
    #[serde(rename = "mediaProgress", default)]
    pub media_progress: Vec<MediaProgress>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaProgress {
    pub id: Option<String>,
    #[serde(rename = "libraryItemId")]
    pub library_item_id: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub progress: f64,
    #[serde(rename = "currentTime", default)]
    pub current_time: f64,
    #[serde(rename = "isFinished", default)]
    pub is_finished: bool,
    /// UNIX millis.
    #[serde(rename = "lastUpdate", default)]
    pub last_update: i64,
}
