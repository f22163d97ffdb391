//! HTTP-backed capability adapter.
//!
//! POSTs each contract as JSON to a per-stage endpoint from `[endpoints]`
//! config. Transport and provider-side faults map onto the transient error
//! class; any other non-success status is the stage's terminal signal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use tailor_shared::{EndpointsConfig, Result, TailorError};

use crate::{
    CapabilityError, CapabilityResult, EmbedCapability, EmbedOutput, EmbedRequest,
    GenerateCapability, GenerateOutput, GenerateRequest, ParseCapability, ParseOutput,
    ParseRequest, RenderCapability, RenderOutput, RenderRequest, RetrieveCapability,
    RetrieveOutput, RetrieveRequest,
};

/// User-Agent string for capability requests.
const USER_AGENT: &str = concat!("Tailor/", env!("CARGO_PKG_VERSION"));

/// One HTTP client serving all five capability contracts.
pub struct HttpCapabilities {
    client: Client,
    endpoints: EndpointsConfig,
}

impl HttpCapabilities {
    /// Build a client for the configured endpoints.
    ///
    /// `request_timeout` should exceed the stage executor's per-attempt
    /// timeout so the executor, not the transport, decides when to give up.
    pub fn new(endpoints: EndpointsConfig, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TailorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoints })
    }

    /// POST `body` to the stage endpoint and decode the JSON response.
    async fn post<Req, Resp>(
        &self,
        stage: &'static str,
        endpoint: Option<&Url>,
        body: &Req,
        terminal: fn(String) -> CapabilityError,
    ) -> CapabilityResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = endpoint
            .ok_or_else(|| terminal(format!("no endpoint configured for stage '{stage}'")))?;

        debug!(stage, %url, "dispatching capability request");

        let response = self
            .client
            .post(url.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Throttled(format!("{stage}: request timed out: {e}"))
                } else {
                    CapabilityError::Unavailable(format!("{stage}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(stage, %status, "capability request failed");
            return Err(classify_status(stage, status, detail, terminal));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| terminal(format!("{stage}: malformed provider response: {e}")))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn classify_status(
    stage: &str,
    status: StatusCode,
    detail: String,
    terminal: fn(String) -> CapabilityError,
) -> CapabilityError {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            CapabilityError::Throttled(format!("{stage}: HTTP {status}"))
        }
        s if s.is_server_error() => CapabilityError::Unavailable(format!("{stage}: HTTP {status}")),
        _ => terminal(format!("{stage}: HTTP {status}: {detail}")),
    }
}

#[async_trait]
impl ParseCapability for HttpCapabilities {
    async fn parse(&self, request: ParseRequest) -> CapabilityResult<ParseOutput> {
        self.post(
            "parse",
            self.endpoints.parse.as_ref(),
            &request,
            CapabilityError::UnreadableDocument,
        )
        .await
    }
}

#[async_trait]
impl EmbedCapability for HttpCapabilities {
    async fn embed(&self, request: EmbedRequest) -> CapabilityResult<EmbedOutput> {
        self.post(
            "embed",
            self.endpoints.embed.as_ref(),
            &request,
            CapabilityError::EmbeddingUnavailable,
        )
        .await
    }
}

#[async_trait]
impl RetrieveCapability for HttpCapabilities {
    async fn retrieve(&self, request: RetrieveRequest) -> CapabilityResult<RetrieveOutput> {
        self.post(
            "retrieve",
            self.endpoints.retrieve.as_ref(),
            &request,
            CapabilityError::IndexUnavailable,
        )
        .await
    }
}

#[async_trait]
impl GenerateCapability for HttpCapabilities {
    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<GenerateOutput> {
        self.post(
            "generate",
            self.endpoints.generate.as_ref(),
            &request,
            CapabilityError::GenerationBlocked,
        )
        .await
    }
}

#[async_trait]
impl RenderCapability for HttpCapabilities {
    async fn render(&self, request: RenderRequest) -> CapabilityResult<RenderOutput> {
        self.post(
            "render",
            self.endpoints.render.as_ref(),
            &request,
            CapabilityError::RenderFailed,
        )
        .await
    }
}
