//! HTTP exporter delivering reports to the remote collector.
//!
//! Authentication happens lazily: the first delivery exchanges the
//! process credential for a session token at the accounts endpoint and
//! reuses the token until the collector rejects it, at which point the
//! cached token is invalidated so the retry path re-authenticates.

use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures_util::future::BoxFuture;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::ExportError;
use crate::export::model::{build_report, Report};
use crate::export::{Batch, BatchExporter, ExportResult};

const AUTHENTICATE_PATH: &str = "/agent/authenticate";
const REPORT_PATH: &str = "/report";
const AUTHENTICATION_HEADER: &str = "x-agent-authentication";
const SESSION_TOKEN_HEADER: &str = "x-agent-token";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    token: String,
}

/// Collector client over HTTP.
///
/// One instance is owned by the reporter's worker thread; delivery
/// attempts are bounded by the configured export timeout.
#[derive(Debug)]
pub struct HttpExporter {
    client: reqwest::blocking::Client,
    config: Arc<Config>,
    session: Option<String>,
}

impl HttpExporter {
    /// Creates an exporter for the configured collector endpoints.
    pub fn new(config: Arc<Config>) -> Self {
        HttpExporter {
            client: reqwest::blocking::Client::new(),
            config,
            session: None,
        }
    }

    fn authenticate(&self) -> Result<String, ExportError> {
        let credential = self.config.authentication.clone().ok_or_else(|| {
            ExportError::Unauthenticated("no authentication credential configured".to_owned())
        })?;

        let response = self
            .client
            .post(self.config.accounts_url(AUTHENTICATE_PATH))
            .timeout(self.config.export_timeout)
            .header(AUTHENTICATION_HEADER, credential)
            .send()?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ExportError::Unauthenticated(format!(
                "accounts endpoint rejected credential with status {status}"
            )));
        }
        if !status.is_success() {
            return Err(ExportError::Collector {
                status: status.as_u16(),
            });
        }

        let auth: AuthResponse = response.json()?;
        debug!("authenticated with collector; session established");
        Ok(auth.session.token)
    }

    fn session_token(&mut self) -> Result<String, ExportError> {
        if let Some(token) = &self.session {
            return Ok(token.clone());
        }
        let token = self.authenticate()?;
        self.session = Some(token.clone());
        Ok(token)
    }

    fn send_report(&mut self, report: &Report) -> Result<(), ExportError> {
        let token = self.session_token()?;
        let body = serde_json::to_vec(report)?;

        let mut request = self
            .client
            .post(self.config.report_url(REPORT_PATH))
            .timeout(self.config.export_timeout)
            .header(SESSION_TOKEN_HEADER, token)
            .header(CONTENT_TYPE, "application/json");
        request = if self.config.report_deflate {
            request
                .header(CONTENT_ENCODING, "deflate")
                .body(deflate(&body)?)
        } else {
            request.body(body)
        };

        let status = request.send()?.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // stale session; the next attempt re-authenticates
            self.session = None;
            return Err(ExportError::Unauthenticated(format!(
                "report endpoint rejected session token with status {status}"
            )));
        }
        if !status.is_success() {
            return Err(ExportError::Collector {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl BatchExporter for HttpExporter {
    fn export(&mut self, batches: Vec<Batch>) -> BoxFuture<'static, ExportResult> {
        let report = build_report(self.config.hostname.as_deref(), &batches);
        let result = self.send_report(&report);
        Box::pin(std::future::ready(result))
    }
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|err| ExportError::Other(format!("failed to compress report payload: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn deflate_round_trips() {
        let payload = br#"{"endpoints":[]}"#;
        let compressed = deflate(payload).unwrap();
        assert_ne!(compressed, payload.to_vec());

        let mut decoder = flate2::read::ZlibDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn missing_credential_fails_before_any_request() {
        temp_env::with_var_unset("TRACELINE_AUTHENTICATION", || {
            let config = Arc::new(Config::builder().build());
            let mut exporter = HttpExporter::new(config);
            assert!(matches!(
                exporter.session_token(),
                Err(ExportError::Unauthenticated(_))
            ));
        });
    }

    #[test]
    fn auth_response_shape() {
        let auth: AuthResponse =
            serde_json::from_str(r#"{"session": {"token": "hey-guyz-i-am-a-token"}}"#).unwrap();
        assert_eq!(auth.session.token, "hey-guyz-i-am-a-token");
    }
}
