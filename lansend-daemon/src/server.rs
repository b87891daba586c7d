//! HTTPS surface: TLS termination plus thin routing of the protocol
//! paths onto the engine. The TLS config is built per connection so the
//! pinning verifier sees the peer's observed address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body as _, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use lansend_protocol::{CancelRequest, ConnectRequest, Notification, PingResponse, SendRequest};

use crate::engine::TransferEngine;
use crate::error::{Error, Result};

/// Largest request body we will buffer: one chunk plus protocol slack.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

pub struct Server {
    engine: Arc<TransferEngine>,
}

impl Server {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.engine.port()));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind {}: {}", addr, e)))?;

        info!("listening on https://{}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        handle_connection(engine, stream, peer).await;
                    });
                }
                Err(e) => {
                    warn!("accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    engine: Arc<TransferEngine>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    let config = match engine
        .tls()
        .server_config(peer.ip().to_string(), peer.port())
    {
        Ok(config) => config,
        Err(e) => {
            warn!("failed to build TLS config for {}: {}", peer, e);
            return;
        }
    };

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            warn!("TLS handshake with {} failed: {}", peer, e);
            engine.bus().post_notification(Notification::peer_error(
                format!("TLS handshake failed: {}", e),
                peer.to_string(),
            ));
            return;
        }
    };

    debug!("TLS session established with {}", peer);

    let service = service_fn(move |request| {
        let engine = engine.clone();
        async move { route(engine, peer, request).await }
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!("connection from {} ended: {}", peer, e);
    }
}

async fn route(
    engine: Arc<TransferEngine>,
    peer: SocketAddr,
    request: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = parse_query(request.uri().query().unwrap_or(""));

    let response = match (method, path.as_str()) {
        (Method::GET, "/api/localsend/v2/info") => json_ok(&engine.info_response()),
        (Method::GET, "/api/localsend/v2/ping") => json_ok(&PingResponse { alive: true }),
        (Method::POST, "/api/localsend/v2/connect") => {
            match read_json::<ConnectRequest>(request).await {
                Ok(body) => match engine.handle_connect(body) {
                    Ok(response) => json_ok(&response),
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }
        (Method::POST, "/api/localsend/v2/send-request") => {
            match read_json::<SendRequest>(request).await {
                Ok(body) => {
                    match engine
                        .handle_send_request(&peer.ip().to_string(), body)
                        .await
                    {
                        Ok(response) => json_ok(&response),
                        Err(e) => error_response(&e),
                    }
                }
                Err(e) => error_response(&e),
            }
        }
        (Method::POST, "/api/localsend/v2/upload") => {
            let params = (
                query.get("session_id"),
                query.get("file_id"),
                query.get("chunk_index").and_then(|v| v.parse::<u64>().ok()),
            );
            match params {
                (Some(session_id), Some(file_id), Some(chunk_index)) => {
                    match read_body(request).await {
                        Ok(body) => {
                            match engine
                                .handle_upload(session_id, file_id, chunk_index, &body)
                                .await
                            {
                                Ok(transfer_id) => {
                                    debug!(
                                        transfer_id,
                                        chunk_index,
                                        from = %peer,
                                        "chunk stored"
                                    );
                                    empty_ok()
                                }
                                Err(e) => error_response(&e),
                            }
                        }
                        Err(e) => error_response(&e),
                    }
                }
                _ => error_response(&Error::Protocol(
                    "upload requires session_id, file_id and chunk_index".into(),
                )),
            }
        }
        (Method::POST, "/api/localsend/v2/cancel" | "/cancel") => {
            match read_json::<CancelRequest>(request).await {
                Ok(body) => {
                    engine.handle_cancel(body).await;
                    // Best-effort by contract: always 200.
                    empty_ok()
                }
                Err(_) => empty_ok(),
            }
        }
        _ => {
            debug!("no route for {} {}", request.method(), path);
            status_response(StatusCode::NOT_FOUND, "not found")
        }
    };

    Ok(response)
}

async fn read_body(request: Request<Incoming>) -> Result<Bytes> {
    if let Some(len) = request.body().size_hint().upper() {
        if len > MAX_BODY_BYTES {
            return Err(Error::Protocol(format!("body of {} bytes is too large", len)));
        }
    }
    let collected = request
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("body read failed: {}", e))))?;
    Ok(collected.to_bytes())
}

async fn read_json<T: serde::de::DeserializeOwned>(request: Request<Incoming>) -> Result<T> {
    let body = read_body(request).await?;
    serde_json::from_slice(&body).map_err(|e| Error::Protocol(format!("malformed payload: {}", e)))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn json_ok<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("static response"),
        Err(e) => status_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("serialization failed: {}", e),
        ),
    }
}

fn empty_ok() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(b"{}")))
        .expect("static response")
}

fn status_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}

fn error_response(error: &Error) -> Response<Full<Bytes>> {
    let status = match error {
        Error::PolicyRejected(_) => StatusCode::FORBIDDEN,
        Error::Protocol(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        Error::Tls { .. } => StatusCode::FORBIDDEN,
        Error::Io(_) | Error::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    status_response(status, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let q = parse_query("session_id=recv_1&file_id=f1&chunk_index=4");
        assert_eq!(q.get("session_id").unwrap(), "recv_1");
        assert_eq!(q.get("file_id").unwrap(), "f1");
        assert_eq!(q.get("chunk_index").unwrap(), "4");

        assert!(parse_query("").is_empty());
        assert!(parse_query("novalue").is_empty());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_response(&Error::PolicyRejected("no".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(&Error::Protocol("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::Io(std::io::Error::other("disk"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
