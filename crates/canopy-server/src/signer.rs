//! HTTP request signing (`rsa-sha256` draft-cavage signatures).
//!
//! GET requests sign `(request-target) date host`. Requests with a body also
//! sign `x-content-sha256 content-type content-length`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

use crate::error::{Result, ServerError};

/// Signs outgoing requests with one key.
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            key_id: key_id.into(),
            private_key,
        }
    }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(key_id: impl Into<String>, pem: &str) -> Result<Self> {
        Ok(Self::new(key_id, parse_private_key(pem)?))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Same key, presented under a different key id.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Public half of the signing key as PEM.
    pub fn public_key_pem(&self) -> Result<String> {
        RsaPublicKey::from(&self.private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ServerError::internal(format!("Failed to encode public key: {}", e)))
    }

    /// Headers to attach to the request, `authorization` included.
    pub fn sign(&self, method: &Method, url: &Url, body: Option<&[u8]>) -> Result<HeaderMap> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        self.sign_at(method, url, body, &date)
    }

    fn sign_at(&self, method: &Method, url: &Url, body: Option<&[u8]>, date: &str) -> Result<HeaderMap> {
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        let mut signed: Vec<(&str, String)> = vec![
            ("(request-target)", request_target(method, url)),
            ("date", date.to_string()),
            ("host", host),
        ];
        if let Some(body) = body {
            signed.push(("x-content-sha256", STANDARD.encode(Sha256::digest(body))));
            signed.push(("content-type", "application/json".to_string()));
            signed.push(("content-length", body.len().to_string()));
        }

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key.sign(signing_string(&signed).as_bytes());
        let header_names: Vec<&str> = signed.iter().map(|(name, _)| *name).collect();
        let authorization = format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            header_names.join(" "),
            STANDARD.encode(signature.to_bytes())
        );

        let mut headers = HeaderMap::new();
        for (name, value) in signed.iter().filter(|(name, _)| *name != "(request-target)") {
            insert_header(&mut headers, name, value)?;
        }
        insert_header(&mut headers, "authorization", &authorization)?;
        Ok(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ServerError::internal(format!("Invalid header name {}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ServerError::internal(format!("Invalid header value for {:?}: {}", name, e)))?;
    headers.insert(name, value);
    Ok(())
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| ServerError::upstream(format!("Unable to read private key: {}", e)))
}

fn request_target(method: &Method, url: &Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// `name: value` lines joined with `\n`, in signing order.
pub fn signing_string(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base64 payload of a PEM document with the armor lines removed.
pub fn pem_body(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect()
}

/// SHA-1 fingerprint of a PEM certificate, as colon separated upper-case hex.
pub fn certificate_fingerprint(pem: &str) -> Result<String> {
    let der = STANDARD
        .decode(pem_body(pem))
        .map_err(|e| ServerError::upstream(format!("Malformed certificate: {}", e)))?;
    Ok(der_fingerprint(&der))
}

/// Tenancy named in an instance certificate subject (`opc-tenant:<ocid>`).
pub fn certificate_tenancy(pem: &str) -> Result<String> {
    let (_, document) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| ServerError::upstream(format!("Malformed certificate: {}", e)))?;
    let certificate = document
        .parse_x509()
        .map_err(|e| ServerError::upstream(format!("Malformed certificate: {}", e)))?;

    let tenancy = certificate
        .subject()
        .iter_attributes()
        .filter_map(|attribute| attribute.as_str().ok())
        .find_map(|value| {
            value
                .strip_prefix("opc-tenant:")
                .or_else(|| value.strip_prefix("opc-identity:"))
        })
        .map(str::to_string);

    tenancy.ok_or_else(|| ServerError::upstream("Instance certificate does not name a tenancy"))
}

fn der_fingerprint(der: &[u8]) -> String {
    Sha1::digest(der)
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target_includes_query() {
        let url = Url::parse(
            "https://identity.us-ashburn-1.oraclecloud.com/20160918/compartments?compartmentId=ocid1.tenancy.x",
        )
        .unwrap();
        assert_eq!(
            request_target(&Method::GET, &url),
            "get /20160918/compartments?compartmentId=ocid1.tenancy.x"
        );
    }

    #[test]
    fn test_signing_string_layout() {
        let signed = vec![
            ("(request-target)", "get /20160918/policies".to_string()),
            ("date", "Thu, 05 Jan 2014 21:31:40 GMT".to_string()),
            ("host", "identity.us-phoenix-1.oraclecloud.com".to_string()),
        ];
        assert_eq!(
            signing_string(&signed),
            "(request-target): get /20160918/policies\ndate: Thu, 05 Jan 2014 21:31:40 GMT\nhost: identity.us-phoenix-1.oraclecloud.com"
        );
    }

    #[test]
    fn test_pem_body_strips_armor() {
        let pem = "-----BEGIN CERTIFICATE-----\nYWJj\nZGVm\n-----END CERTIFICATE-----\n";
        assert_eq!(pem_body(pem), "YWJjZGVm");
    }

    #[test]
    fn test_fingerprint_format() {
        // base64("abc") == "YWJj"
        let pem = "-----BEGIN CERTIFICATE-----\nYWJj\n-----END CERTIFICATE-----";
        assert_eq!(
            certificate_fingerprint(pem).unwrap(),
            "A9:99:3E:36:47:06:81:6A:BA:3E:25:71:78:50:C2:6C:9C:D0:D8:9D"
        );
    }

    const KEY: &str = include_str!("../tests/fixtures/instance_key.pem");
    const CERT: &str = include_str!("../tests/fixtures/instance_cert.pem");

    fn authorization_param<'a>(authorization: &'a str, name: &str) -> &'a str {
        let start = authorization.find(&format!("{}=\"", name)).unwrap() + name.len() + 2;
        let len = authorization[start..].find('"').unwrap();
        &authorization[start..start + len]
    }

    #[test]
    fn test_signature_verifies_against_public_key() {
        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::pkcs8::DecodePublicKey;
        use rsa::signature::Verifier;

        let signer = RequestSigner::from_pem("ocid1.tenancy.x/ocid1.user.u/aa:bb", KEY).unwrap();
        let url = Url::parse(
            "https://identity.us-ashburn-1.oraclecloud.com/20160918/compartments?compartmentId=ocid1.tenancy.x",
        )
        .unwrap();
        let date = "Thu, 05 Jan 2014 21:31:40 GMT";
        let headers = signer.sign_at(&Method::GET, &url, None, date).unwrap();

        assert_eq!(headers["date"], date);
        assert_eq!(headers["host"], "identity.us-ashburn-1.oraclecloud.com");
        assert!(headers.get("x-content-sha256").is_none());

        let authorization = headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with("Signature version=\"1\","));
        assert_eq!(authorization_param(authorization, "keyId"), "ocid1.tenancy.x/ocid1.user.u/aa:bb");
        assert_eq!(authorization_param(authorization, "algorithm"), "rsa-sha256");
        assert_eq!(
            authorization_param(authorization, "headers"),
            "(request-target) date host"
        );

        let expected = signing_string(&[
            ("(request-target)", request_target(&Method::GET, &url)),
            ("date", date.to_string()),
            ("host", "identity.us-ashburn-1.oraclecloud.com".to_string()),
        ]);
        let signature = STANDARD
            .decode(authorization_param(authorization, "signature"))
            .unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(&signer.public_key_pem().unwrap()).unwrap();
        VerifyingKey::<Sha256>::new(public_key)
            .verify(
                expected.as_bytes(),
                &Signature::try_from(signature.as_slice()).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn test_body_headers_are_signed() {
        let signer = RequestSigner::from_pem("key", KEY).unwrap();
        let url = Url::parse("https://auth.us-ashburn-1.oraclecloud.com:8443/v1/x509").unwrap();
        let body = br#"{"certificate":"abc"}"#;
        let headers = signer
            .sign_at(&Method::POST, &url, Some(body), "Thu, 05 Jan 2014 21:31:40 GMT")
            .unwrap();

        assert_eq!(headers["host"], "auth.us-ashburn-1.oraclecloud.com:8443");
        assert_eq!(headers["content-length"], body.len().to_string().as_str());
        assert_eq!(
            headers["x-content-sha256"],
            STANDARD.encode(Sha256::digest(body)).as_str()
        );
        let authorization = headers["authorization"].to_str().unwrap();
        assert_eq!(
            authorization_param(authorization, "headers"),
            "(request-target) date host x-content-sha256 content-type content-length"
        );
    }

    #[test]
    fn test_certificate_tenancy_from_subject() {
        assert_eq!(certificate_tenancy(CERT).unwrap(), "ocid1.tenancy.oc1..tttt");
        assert_eq!(
            certificate_fingerprint(CERT).unwrap(),
            "5D:43:EA:04:4C:56:92:2B:AE:27:7F:BC:B3:81:71:38:0E:E5:E4:CA"
        );

        let intermediate = include_str!("../tests/fixtures/intermediate_cert.pem");
        assert!(matches!(
            certificate_tenancy(intermediate),
            Err(ServerError::UpstreamFailure(_))
        ));
    }

    #[test]
    fn test_garbage_key_is_rejected() {
        let err = parse_private_key("not a key").unwrap_err();
        assert!(matches!(err, ServerError::UpstreamFailure(_)));
    }
}
