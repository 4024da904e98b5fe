//! HTTP registry backend
//!
//! Rate-limited client for the remote registry service. All session
//! endpoints are POSTs with JSON bodies; graph reads are GETs. A minimum
//! interval between requests keeps a single importer safely inside the
//! service's per-client quota regardless of per-call latency.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::BackendError;
use crate::registry::session::{ImportSession, RecoveryStatus};
use crate::registry::types::{Company, EntityKey, ShareEntity, ShareHolding};

use super::{
    BatchOutcome, FinishBatchOutcome, FinishSummary, IngestBatchRequest, RegistryBackend,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    last_request: Mutex<Instant>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            last_request: Mutex::new(Instant::now()),
        })
    }

    /// Enforce the minimum interval between requests.
    async fn rate_limit(&self) {
        let elapsed = {
            let last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
            last.elapsed()
        };
        if elapsed < MIN_REQUEST_INTERVAL {
            sleep(MIN_REQUEST_INTERVAL - elapsed).await;
        }
        let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        self.rate_limit().await;
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        Self::decode(req.send().await?).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        self.rate_limit().await;
        let mut req = self.client.get(self.url(path)).query(query);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        Self::decode(req.send().await?).await
    }
}

#[derive(Serialize)]
struct StartSessionBody {
    year: i32,
    #[serde(rename = "isGlobal")]
    is_global: bool,
}

/// The start response carries only the new session's identity; the rest of
/// the session record is client-side state.
#[derive(Deserialize)]
struct StartSessionResponse {
    session_id: Uuid,
    year: i32,
}

#[derive(Serialize)]
struct SessionRefBody {
    session_id: Uuid,
    year: i32,
    #[serde(rename = "isGlobal")]
    is_global: bool,
}

#[derive(Serialize)]
struct FinishBatchBody {
    session_id: Uuid,
    year: i32,
    batch_size: u32,
    offset: u64,
}

#[derive(Serialize)]
struct EntityLookupBody<'a> {
    keys: &'a [EntityKey],
}

#[async_trait]
impl RegistryBackend for HttpBackend {
    async fn start_session(
        &self,
        year: i32,
        is_global: bool,
    ) -> Result<ImportSession, BackendError> {
        let resp: StartSessionResponse = self
            .post("import-session/start", &StartSessionBody { year, is_global })
            .await?;
        let mut session = ImportSession::start(resp.year, is_global);
        session.session_id = resp.session_id;
        Ok(session)
    }

    async fn ingest_batch(&self, req: IngestBatchRequest) -> Result<BatchOutcome, BackendError> {
        self.post("import-session/ingest", &req).await
    }

    async fn finish_import(
        &self,
        session_id: Uuid,
        year: i32,
        is_global: bool,
    ) -> Result<FinishSummary, BackendError> {
        self.post(
            "import-session/finish",
            &SessionRefBody {
                session_id,
                year,
                is_global,
            },
        )
        .await
    }

    async fn finish_import_batch(
        &self,
        session_id: Uuid,
        year: i32,
        batch_size: u32,
        offset: u64,
    ) -> Result<FinishBatchOutcome, BackendError> {
        self.post(
            "import-session/finish-batch",
            &FinishBatchBody {
                session_id,
                year,
                batch_size,
                offset,
            },
        )
        .await
    }

    async fn check_recovery(
        &self,
        session_id: Uuid,
        year: i32,
        is_global: bool,
    ) -> Result<RecoveryStatus, BackendError> {
        self.post(
            "import-session/recover",
            &SessionRefBody {
                session_id,
                year,
                is_global,
            },
        )
        .await
    }

    async fn company_by_orgnr(&self, orgnr: &str) -> Result<Option<Company>, BackendError> {
        let path = format!("companies/{orgnr}");
        match self.get::<Company>(&path, &[]).await {
            Ok(company) => Ok(Some(company)),
            Err(BackendError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn holdings_of_company(
        &self,
        orgnr: &str,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError> {
        let path = format!("companies/{orgnr}/holdings");
        self.get(&path, &[("year", year.to_string())]).await
    }

    async fn holdings_of_holder(
        &self,
        holder: &EntityKey,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError> {
        self.get(
            "holdings",
            &[
                ("holder", holder.as_str().to_string()),
                ("year", year.to_string()),
            ],
        )
        .await
    }

    async fn entities_by_keys(
        &self,
        keys: &[EntityKey],
    ) -> Result<Vec<ShareEntity>, BackendError> {
        self.post("entities/lookup", &EntityLookupBody { keys }).await
    }
}
