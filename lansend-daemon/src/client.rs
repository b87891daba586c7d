//! HTTPS client for one peer endpoint, with the pinning verifier for
//! that exact `(ip, port)` baked into its TLS configuration.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use lansend_protocol::{
    CancelRequest, ConnectRequest, ConnectResponse, InfoResponse, PingResponse, SendRequest,
    SendResponse, API_PREFIX,
};

use crate::error::{Error, Result};
use crate::tls::TlsContextFactory;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PeerClient {
    peer: String,
    base_url: String,
    inner: reqwest::Client,
}

impl PeerClient {
    pub fn new(factory: &TlsContextFactory, ip: &str, port: u16) -> Result<Self> {
        let tls = factory.client_config(ip.to_string(), port)?;

        let inner = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            peer: format!("{}:{}", ip, port),
            base_url: format!("https://{}:{}", ip, port),
            inner,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn route(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    pub async fn info(&self) -> Result<InfoResponse> {
        let response = self
            .inner
            .get(self.route("/info"))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let response = self.expect_ok(response).await?;
        Ok(response.json().await.map_err(|e| self.classify(e))?)
    }

    pub async fn ping(&self) -> Result<bool> {
        let response = self
            .inner
            .get(self.route("/ping"))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let response = self.expect_ok(response).await?;
        let ping: PingResponse = response.json().await.map_err(|e| self.classify(e))?;
        Ok(ping.alive)
    }

    pub async fn connect_device(&self, request: &ConnectRequest) -> Result<ConnectResponse> {
        let response = self
            .inner
            .post(self.route("/connect"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if response.status() == StatusCode::FORBIDDEN {
            return Err(Error::PolicyRejected(format!(
                "{} rejected the auth code",
                self.peer
            )));
        }
        let response = self.expect_ok(response).await?;
        Ok(response.json().await.map_err(|e| self.classify(e))?)
    }

    /// Issue the send-request. 200 means accepted (the body names the
    /// accepted files), 403 means the recipient declined.
    pub async fn send_request(&self, request: &SendRequest) -> Result<SendResponse> {
        let response = self
            .inner
            .post(self.route("/send-request"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if response.status() == StatusCode::FORBIDDEN {
            return Err(Error::PolicyRejected(format!(
                "{} declined the transfer",
                self.peer
            )));
        }
        let response = self.expect_ok(response).await?;
        Ok(response.json().await.map_err(|e| self.classify(e))?)
    }

    /// Upload one chunk. A non-2xx 4xx status is fatal for the session;
    /// 5xx and transport errors are transient and retried by the caller.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        file_id: &str,
        chunk_index: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        debug!(
            peer = %self.peer,
            session_id,
            file_id,
            chunk_index,
            bytes = data.len(),
            "uploading chunk"
        );

        let index = chunk_index.to_string();
        let response = self
            .inner
            .post(self.route("/upload"))
            .query(&[
                ("session_id", session_id),
                ("file_id", file_id),
                ("chunk_index", index.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        self.expect_ok(response).await.map(|_| ())
    }

    /// Best-effort cancel notice; the peer always answers 200.
    pub async fn cancel(&self, transfer_id: u64) -> Result<()> {
        let response = self
            .inner
            .post(self.route("/cancel"))
            .json(&CancelRequest { transfer_id })
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        self.expect_ok(response).await.map(|_| ())
    }

    async fn expect_ok(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            // Transient by policy: the peer may recover.
            Err(Error::Io(std::io::Error::other(format!(
                "{} answered {}: {}",
                self.peer, status, body
            ))))
        } else if status == StatusCode::FORBIDDEN {
            Err(Error::PolicyRejected(format!(
                "{} answered 403: {}",
                self.peer, body
            )))
        } else {
            Err(Error::Protocol(format!(
                "{} answered {}: {}",
                self.peer, status, body
            )))
        }
    }

    fn classify(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("request to {} timed out", self.peer))
        } else if e.is_connect() {
            Error::Io(std::io::Error::other(format!(
                "connection to {} failed: {}",
                self.peer, e
            )))
        } else if e.is_decode() {
            Error::Protocol(format!("malformed response from {}: {}", self.peer, e))
        } else {
            Error::Io(std::io::Error::other(format!(
                "request to {} failed: {}",
                self.peer, e
            )))
        }
    }
}
