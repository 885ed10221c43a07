//! reqwest implementations of the judge and hint services.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    clients::{ClientError, ClientResult, HintService, JudgeService},
    config::EndpointConfig,
    dto::{
        hint::{HintRequest, HintResponse},
        judge::{JudgeRequest, JudgeResponse},
    },
};

#[derive(Clone)]
struct JsonEndpoint {
    client: Client,
    url: Option<Arc<str>>,
    timeout: Duration,
}

impl JsonEndpoint {
    fn new(client: Client, config: &EndpointConfig) -> Self {
        Self {
            client,
            url: config.url.as_deref().map(Arc::from),
            timeout: config.timeout,
        }
    }

    fn post<B, R>(&self, body: B) -> BoxFuture<'static, ClientResult<R>>
    where
        B: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let endpoint = self.clone();
        Box::pin(async move {
            let url = endpoint.url.ok_or(ClientError::NotConfigured)?;
            let response = endpoint
                .client
                .post(url.as_ref())
                .timeout(endpoint.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        ClientError::Timeout(endpoint.timeout)
                    } else {
                        ClientError::Request(err.to_string())
                    }
                })?;

            let status = response.status();
            debug!(url = %url, status = status.as_u16(), "external service answered");
            if !status.is_success() {
                return Err(ClientError::Status {
                    status: status.as_u16(),
                });
            }

            response
                .json::<R>()
                .await
                .map_err(|err| ClientError::Parse(err.to_string()))
        })
    }
}

/// Judge reached with a JSON POST.
#[derive(Clone)]
pub struct HttpJudge {
    endpoint: JsonEndpoint,
}

impl HttpJudge {
    pub fn new(client: Client, config: &EndpointConfig) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, config),
        }
    }
}

impl JudgeService for HttpJudge {
    fn score(&self, request: JudgeRequest) -> BoxFuture<'static, ClientResult<JudgeResponse>> {
        self.endpoint.post(request)
    }
}

/// Hint service reached with a JSON POST.
#[derive(Clone)]
pub struct HttpHints {
    endpoint: JsonEndpoint,
}

impl HttpHints {
    pub fn new(client: Client, config: &EndpointConfig) -> Self {
        Self {
            endpoint: JsonEndpoint::new(client, config),
        }
    }
}

impl HintService for HttpHints {
    fn suggest(&self, request: HintRequest) -> BoxFuture<'static, ClientResult<HintResponse>> {
        self.endpoint.post(request)
    }
}
