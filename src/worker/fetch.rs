//! Network fetch seam for the cache router.
//!
//! Strategies talk to the network through the [`Fetch`] trait so tests can
//! substitute canned or failing transports. The real implementation wraps
//! a reqwest client.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use url::Url;

/// Request verb. Only GET traffic is ever cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
}

impl Method {
  pub fn is_get(&self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
    }
  }
}

/// Whether the request is a top-level document navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  Default,
  Navigate,
}

/// An outbound request as seen by the router.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Default,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Whether this request targets the same scheme/host/port as `origin`.
  pub fn same_origin_as(&self, origin: &Url) -> bool {
    self.url.scheme() == origin.scheme()
      && self.url.host_str() == origin.host_str()
      && self.url.port_or_known_default() == origin.port_or_known_default()
  }

  /// Stable request-identity key: sha256 over method + URL.
  pub fn identity(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response snapshot, as stored in and served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: String,
  pub body: Vec<u8>,
}

impl Response {
  /// Whether the response is cacheable (the strategies only store 200s).
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn html(status: u16, body: &str) -> Self {
    Self {
      status,
      content_type: "text/html; charset=utf-8".to_string(),
      body: body.as_bytes().to_vec(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      content_type: "application/json".to_string(),
      body: value.to_string().into_bytes(),
    }
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Trait for network transports.
///
/// The returned future owns everything it needs, which lets strategies
/// hand it to a background task (stale-while-revalidate refreshes).
pub trait Fetch: Send + Sync {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response>>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build http client: {}", e))?;
    Ok(Self { client })
  }
}

impl Fetch for HttpFetcher {
  fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response>> {
    let client = self.client.clone();
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
      Method::Patch => reqwest::Method::PATCH,
    };
    let url = request.url.clone();

    Box::pin(async move {
      let response = client
        .request(method, url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", url, e))?
        .to_vec();

      Ok(Response {
        status,
        content_type,
        body,
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_origin_check() {
    let origin = Url::parse("https://app.example").unwrap();
    let same = Request::get(Url::parse("https://app.example/api/tasks").unwrap());
    let other = Request::get(Url::parse("https://cdn.example/lib.js").unwrap());

    assert!(same.same_origin_as(&origin));
    assert!(!other.same_origin_as(&origin));
  }

  #[test]
  fn test_identity_depends_on_method_and_url() {
    let url = Url::parse("https://app.example/a").unwrap();
    let get = Request::get(url.clone());
    let post = Request {
      method: Method::Post,
      url,
      mode: RequestMode::Default,
    };

    assert_ne!(get.identity(), post.identity());
    assert_eq!(get.identity().len(), 64);
  }

  #[test]
  fn test_json_response_body() {
    let response = Response::json(503, &serde_json::json!({"error": "offline"}));
    assert_eq!(response.status, 503);
    assert!(response.body_text().contains("offline"));
  }
}
