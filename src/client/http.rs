//! HTTP implementation of the compute API client.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::types::{Image, ImageRequest, Server, ServerTemplate, Snapshot, SnapshotRequest};
use super::{Client, ClientError, ClientFuture};

/// Default account endpoint.
pub const DEFAULT_ACCOUNT_URL: &str = "https://account.cloud.online.net";
/// Default compute endpoint.
pub const DEFAULT_API_URL: &str = "https://api.cloud.online.net";
/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("kiln/", env!("CARGO_PKG_VERSION"), " (onlinelabs builder)");

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct SnapshotEnvelope {
    snapshot: Snapshot,
}

#[derive(Deserialize)]
struct ImageEnvelope {
    image: Image,
}

/// Client for the Online Labs compute API.
#[derive(Clone, Debug)]
pub struct OnlineLabsClient {
    http: reqwest::Client,
    api_token: String,
    api_url: Url,
    account_url: Url,
}

impl OnlineLabsClient {
    /// Creates a client authenticating with `api_token`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the HTTP stack cannot be
    /// initialised (for example, no TLS backend is available).
    pub fn new(
        api_token: impl Into<String>,
        api_url: Url,
        account_url: Url,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ClientError::Transport {
                context: String::from("building HTTP client failed"),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            api_token: api_token.into(),
            api_url,
            account_url,
        })
    }

    /// Compute endpoint used for every request.
    #[must_use]
    pub const fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Account endpoint the token was issued by.
    #[must_use]
    pub const fn account_url(&self) -> &Url {
        &self.account_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut url = self.api_url.clone();
        url.set_path(path);
        debug!(%method, %url, "compute api request");
        self.http
            .request(method, url)
            .header(AUTH_HEADER, &self.api_token)
    }

    async fn execute(request: RequestBuilder, context: &str) -> Result<Vec<u8>, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Transport {
                context: context.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::Transport {
                context: context.to_owned(),
                message: err.to_string(),
            })?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        Err(ClientError::status(
            context,
            status.to_string(),
            String::from_utf8_lossy(&body).into_owned(),
        ))
    }

    fn decode<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T, ClientError> {
        serde_json::from_slice(body).map_err(|err| ClientError::Decode {
            context: context.to_owned(),
            message: err.to_string(),
        })
    }

    async fn send_action(&self, id: &str, action: &str) -> Result<(), ClientError> {
        let context = format!("server {action} failed");
        let request = self
            .request(Method::POST, &format!("/servers/{id}/action"))
            .json(&json!({ "action": action }));
        Self::execute(request, &context).await.map(|_| ())
    }
}

impl Client for OnlineLabsClient {
    fn create_server<'a>(&'a self, template: &'a ServerTemplate) -> ClientFuture<'a, Server> {
        Box::pin(async move {
            const CONTEXT: &str = "server creation failed";
            let request = self.request(Method::POST, "/servers").json(template);
            let body = Self::execute(request, CONTEXT).await?;
            Ok(Self::decode::<ServerEnvelope>(&body, CONTEXT)?.server)
        })
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Server> {
        Box::pin(async move {
            const CONTEXT: &str = "fetching server failed";
            let request = self.request(Method::GET, &format!("/servers/{id}"));
            let body = Self::execute(request, CONTEXT).await?;
            Ok(Self::decode::<ServerEnvelope>(&body, CONTEXT)?.server)
        })
    }

    fn power_on_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.send_action(id, "poweron"))
    }

    fn power_off_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(self.send_action(id, "poweroff"))
    }

    fn destroy_server<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(Method::DELETE, &format!("/servers/{id}"));
            Self::execute(request, "server deletion failed")
                .await
                .map(|_| ())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ClientFuture<'a, Snapshot> {
        Box::pin(async move {
            const CONTEXT: &str = "snapshot creation failed";
            let builder = self.request(Method::POST, "/snapshots").json(request);
            let body = Self::execute(builder, CONTEXT).await?;
            Ok(Self::decode::<SnapshotEnvelope>(&body, CONTEXT)?.snapshot)
        })
    }

    fn create_image<'a>(&'a self, request: &'a ImageRequest) -> ClientFuture<'a, Image> {
        Box::pin(async move {
            const CONTEXT: &str = "image creation failed";
            let builder = self.request(Method::POST, "/images").json(request);
            let body = Self::execute(builder, CONTEXT).await?;
            Ok(Self::decode::<ImageEnvelope>(&body, CONTEXT)?.image)
        })
    }

    fn destroy_image<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(Method::DELETE, &format!("/images/{id}"));
            Self::execute(request, "image deletion failed")
                .await
                .map(|_| ())
        })
    }
}
