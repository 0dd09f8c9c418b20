use crate::collectors::CollectError;
use crate::config::{CollectionConfig, EndpointConfig};
use crate::credentials::Credential;
use crate::inventory::{About, Inventory};
use crate::records::CertificateSummary;
use crate::time::parse_rfc3339_unix;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateSet {
    pub tls: Option<CertificateSummary>,
    pub signing: Option<CertificateSummary>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: &Credential,
    ) -> Result<Arc<dyn Session>, CollectError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn about(&self) -> Result<About, CollectError>;
    async fn inventory(&self) -> Result<Inventory, CollectError>;
    /// Certificate lookups are best effort; failures come back as `None` entries.
    async fn certificates(&self) -> CertificateSet;
    async fn disconnect(&self);
}

pub struct HttpConnector {
    client: Client,
    inventory_path: String,
}

impl HttpConnector {
    pub fn new(cfg: &CollectionConfig) -> Result<Self, reqwest::Error> {
        // Management endpoints sit on the internal network with self-signed
        // certificates; validation is off unless the config turns it back on.
        let client = Client::builder()
            .user_agent("vinventd/0.1.0")
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .connect_timeout(cfg.request_timeout)
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            client,
            inventory_path: cfg.inventory_path.clone(),
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: &Credential,
    ) -> Result<Arc<dyn Session>, CollectError> {
        let base = format!("https://{}", endpoint.address);
        let response = self
            .client
            .post(format!("{base}/api/session"))
            .basic_auth(&credential.username, Some(&credential.password))
            .send()
            .await
            .map_err(|err| CollectError::Connect {
                endpoint: endpoint.address.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CollectError::Auth {
                endpoint: endpoint.address.clone(),
                message: format!("session request returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(CollectError::Connect {
                endpoint: endpoint.address.clone(),
                message: format!("session request returned {status}"),
            });
        }

        let token: String = response.json().await.map_err(|err| CollectError::Auth {
            endpoint: endpoint.address.clone(),
            message: format!("malformed session token: {err}"),
        })?;
        debug!(endpoint = %endpoint.address, "session established");

        Ok(Arc::new(HttpSession {
            client: self.client.clone(),
            endpoint: endpoint.address.clone(),
            base,
            token,
            inventory_path: self.inventory_path.clone(),
        }))
    }
}

struct HttpSession {
    client: Client,
    endpoint: String,
    base: String,
    token: String,
    inventory_path: String,
}

#[derive(Debug, Deserialize)]
struct CertificateInfo {
    valid_to: Option<String>,
    issuer_dn: Option<String>,
    subject_dn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SigningCertificate {
    active_cert_chain: Option<CertificateInfo>,
}

impl From<CertificateInfo> for CertificateSummary {
    fn from(info: CertificateInfo) -> Self {
        CertificateSummary {
            expires_at_unix: info.valid_to.as_deref().and_then(parse_rfc3339_unix),
            issuer: info.issuer_dn,
            subject: info.subject_dn,
        }
    }
}

impl HttpSession {
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollectError> {
        let walk_err = |message: String| CollectError::Walk {
            endpoint: self.endpoint.clone(),
            message,
        };
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .header(SESSION_HEADER, &self.token)
            .send()
            .await
            .map_err(|err| walk_err(format!("GET {path}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(walk_err(format!("GET {path} returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|err| walk_err(format!("GET {path}: malformed body: {err}")))
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn about(&self) -> Result<About, CollectError> {
        self.get_json("/api/appliance/system/version").await
    }

    async fn inventory(&self) -> Result<Inventory, CollectError> {
        self.get_json(&self.inventory_path).await
    }

    async fn certificates(&self) -> CertificateSet {
        let tls = match self
            .get_json::<CertificateInfo>("/api/vcenter/certificate-management/vcenter/tls")
            .await
        {
            Ok(info) => Some(info.into()),
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "tls certificate lookup failed");
                None
            }
        };
        let signing = match self
            .get_json::<SigningCertificate>(
                "/api/vcenter/certificate-management/vcenter/signing-certificate",
            )
            .await
        {
            Ok(cert) => cert.active_cert_chain.map(Into::into),
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "signing certificate lookup failed");
                None
            }
        };
        CertificateSet { tls, signing }
    }

    async fn disconnect(&self) {
        let result = self
            .client
            .delete(format!("{}/api/session", self.base))
            .header(SESSION_HEADER, &self.token)
            .send()
            .await;
        match result {
            Ok(resp) => debug!(endpoint = %self.endpoint, status = %resp.status(), "session closed"),
            Err(err) => warn!(endpoint = %self.endpoint, error = %err, "session logout failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_summary_from_api_payload() {
        let info: CertificateInfo = serde_json::from_str(
            r#"{"valid_to": "2030-01-01T00:00:00.000Z", "issuer_dn": "CN=CA", "subject_dn": "CN=vc"}"#,
        )
        .expect("разбор сертификата");
        let summary = CertificateSummary::from(info);
        assert_eq!(summary.expires_at_unix, Some(1_893_456_000));
        assert_eq!(summary.issuer.as_deref(), Some("CN=CA"));

        let signing: SigningCertificate =
            serde_json::from_str(r#"{"active_cert_chain": null}"#).expect("разбор цепочки");
        assert!(signing.active_cert_chain.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connect_error() {
        let cfg = CollectionConfig {
            request_timeout: std::time::Duration::from_millis(500),
            ..CollectionConfig::default()
        };
        let connector = HttpConnector::new(&cfg).expect("клиент");
        let endpoint = EndpointConfig {
            address: "127.0.0.1:1".to_string(),
            deploy_type: crate::config::DeploymentClass::Vcf,
        };
        let credential = Credential {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let err = connector
            .connect(&endpoint, &credential)
            .await
            .err()
            .expect("соединение должно завершиться ошибкой");
        assert_eq!(err.kind(), "connect");
    }
}
