//! The relay's connection to the upstream realtime service.

use crate::credentials::UpstreamAuth;
use anyhow::{Context, Result, anyhow, bail};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue},
};
use tracing::info;
use url::Url;
use voicerag_core::ModelFamily;

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Request id header propagated from the client for end-to-end tracing.
pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Builds the realtime websocket URL for a deployment.
pub fn realtime_url(
    endpoint: &Url,
    family: ModelFamily,
    deployment: &str,
    api_version: &str,
) -> Result<Url> {
    let mut url = endpoint.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => bail!("Unsupported upstream scheme '{other}'"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot use scheme '{scheme}' for {endpoint}"))?;
    url.set_path(family.upstream_path());
    url.query_pairs_mut()
        .clear()
        .append_pair("api-version", api_version)
        .append_pair("deployment", deployment);
    Ok(url)
}

/// Opens authenticated upstream connections, one per relay session.
#[derive(Debug)]
pub struct UpstreamConnector {
    url: Url,
    auth: UpstreamAuth,
}

impl UpstreamConnector {
    pub fn new(
        endpoint: &Url,
        family: ModelFamily,
        deployment: &str,
        api_version: &str,
        auth: UpstreamAuth,
    ) -> Result<Self> {
        Ok(Self {
            url: realtime_url(endpoint, family, deployment, api_version)?,
            auth,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Connects upstream. Authentication failures surface here, before any
    /// frame is relayed.
    pub async fn connect(&self, client_request_id: Option<&HeaderValue>) -> Result<UpstreamStream> {
        let mut request = self.url.as_str().into_client_request()?;
        let (name, credential) = self.auth.header().await?;
        request.headers_mut().insert(name, credential);
        if let Some(id) = client_request_id {
            request.headers_mut().insert(CLIENT_REQUEST_ID, id.clone());
        }

        let (stream, _) = connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to upstream realtime endpoint {}", self.url))?;
        info!(url = %self.url, "Connected to upstream realtime service");
        Ok(stream)
    }
}
