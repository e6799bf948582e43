//! SAML 2.0 AuthnRequest construction and bindings.
//!
//! The intent id travels as `RelayState` so the assertion consumer can find
//! the intent again; the request id is kept on the intent to match
//! `InResponseTo`.

use std::io::Write;

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::DeflateEncoder;

use crate::config::{SamlBinding, SamlIdpConfig};
use crate::error::{IntentError, IntentResult};
use crate::intent::AuthorizationDetails;

const POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// An AuthnRequest to send to a SAML provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    /// Request id, echoed by the provider as `InResponseTo`.
    pub id: String,
    /// Our entity id.
    pub issuer: String,
    /// Provider SSO URL.
    pub destination: String,
    /// Where the provider posts the response.
    pub acs_url: String,
    /// Issue instant.
    pub issue_instant: DateTime<Utc>,
}

impl AuthnRequest {
    /// Creates a request against `config` with a fresh id.
    #[must_use]
    pub fn new(config: &SamlIdpConfig, acs_url: &str, now: DateTime<Utc>) -> Self {
        Self {
            // xsd:ID must not start with a digit
            id: format!("_{}", uuid::Uuid::now_v7().simple()),
            issuer: config.entity_id.clone(),
            destination: config.sso_url.clone(),
            acs_url: acs_url.to_string(),
            issue_instant: now,
        }
    }

    /// Serializes the request.
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{}" Version="2.0" IssueInstant="{}" Destination="{}" "#,
                r#"AssertionConsumerServiceURL="{}" ProtocolBinding="{}">"#,
                r#"<saml:Issuer>{}</saml:Issuer>"#,
                r#"</samlp:AuthnRequest>"#
            ),
            xml_escape(&self.id),
            self.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true),
            xml_escape(&self.destination),
            xml_escape(&self.acs_url),
            POST_BINDING,
            xml_escape(&self.issuer),
        )
    }

    /// Encodes the request for `binding` with `relay_state`.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::Internal`] if compression fails.
    pub fn encode(
        &self,
        binding: SamlBinding,
        relay_state: &str,
    ) -> IntentResult<AuthorizationDetails> {
        let xml = self.to_xml();
        match binding {
            SamlBinding::Redirect => {
                let compressed = deflate(xml.as_bytes())?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
                let separator = if self.destination.contains('?') { '&' } else { '?' };
                let url = format!(
                    "{}{separator}SAMLRequest={}&RelayState={}",
                    self.destination,
                    urlencoding::encode(&encoded),
                    urlencoding::encode(relay_state)
                );
                Ok(AuthorizationDetails::Redirect { url })
            }
            SamlBinding::Post => Ok(AuthorizationDetails::PostForm {
                url: self.destination.clone(),
                fields: vec![
                    (
                        "SAMLRequest".to_string(),
                        base64::engine::general_purpose::STANDARD.encode(xml),
                    ),
                    ("RelayState".to_string(), relay_state.to_string()),
                ],
            }),
        }
    }
}

fn deflate(data: &[u8]) -> IntentResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| IntentError::Internal(format!("deflate: {e}")))
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
