use crate::dto::auth::{
    AuthorizedUserCredentials, CredentialsFile, JwtClaims, ServiceAccountKey, TokenResponse,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// How requests to the service are authorized.
#[derive(Clone)]
pub enum Credentials {
    /// No `Authorization` header at all (emulator).
    Anonymous,
    /// A bearer token issued elsewhere; never refreshed.
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserCredentials),
    /// Tokens from the GCE/GKE metadata server at `host`.
    MetadataServer { host: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::AccessToken(_) => write!(f, "AccessToken(<redacted>)"),
            Credentials::ServiceAccount(key) => {
                write!(f, "ServiceAccount({})", key.client_email)
            }
            Credentials::AuthorizedUser(user) => {
                write!(f, "AuthorizedUser({})", user.client_id)
            }
            Credentials::MetadataServer { host } => write!(f, "MetadataServer({})", host),
        }
    }
}

impl Credentials {
    /// Application-default discovery: the file named by
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud well-known file,
    /// then the metadata server.
    pub fn discover() -> Result<Self> {
        // An empty value counts as unset.
        if let Some(path) = env::var(CREDENTIALS_ENV).ok().filter(|p| !p.is_empty()) {
            debug!("Loading credentials from {}={}", CREDENTIALS_ENV, path);
            return Self::from_file(&path);
        }

        if let Some(path) = well_known_file().filter(|p| p.exists()) {
            debug!("Loading application default credentials from {}", path.display());
            return Self::from_file(&path);
        }

        let host = env::var(METADATA_HOST_ENV).unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
        debug!("No credentials file found, using metadata server at {}", host);
        Ok(Credentials::MetadataServer { host })
    }

    /// Project billed for requests, when the credentials name one.
    pub fn quota_project_id(&self) -> Option<&str> {
        match self {
            Credentials::AuthorizedUser(user) => user.quota_project_id.as_deref(),
            _ => None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read credentials file {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("invalid credentials file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(json)?;
        Ok(match file {
            CredentialsFile::ServiceAccount(key) => Credentials::ServiceAccount(key),
            CredentialsFile::AuthorizedUser(user) => Credentials::AuthorizedUser(user),
        })
    }
}

fn well_known_file() -> Option<PathBuf> {
    if let Ok(dir) = env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    let base = if cfg!(windows) {
        PathBuf::from(env::var("APPDATA").ok()?)
    } else {
        PathBuf::from(env::var("HOME").ok()?).join(".config")
    };
    Some(base.join("gcloud").join("application_default_credentials.json"))
}

/// Build the signed JWT used in the service-account bearer grant.
pub fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String> {
    let claims = JwtClaims {
        iss: key.client_email.clone(),
        scope: PUBSUB_SCOPE.to_string(),
        aud: key.token_uri.clone(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("service account private key is not a valid RSA PEM")?;
    Ok(jsonwebtoken::encode(&header, &claims, &signing_key)?)
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Hands out `Authorization` header values, exchanging and caching access
/// tokens as the credentials require.
pub struct TokenProvider {
    client: Client,
    credentials: Credentials,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            cache: RwLock::new(None),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// `None` when requests go out unauthenticated.
    pub async fn authorization_header(&self) -> Result<Option<String>> {
        match &self.credentials {
            Credentials::Anonymous => Ok(None),
            Credentials::AccessToken(token) => Ok(Some(format!("Bearer {}", token))),
            _ => {
                let token = self.cached_or_refresh().await?;
                Ok(Some(format!("Bearer {}", token)))
            }
        }
    }

    async fn cached_or_refresh(&self) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.value.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let response = self.fetch().await?;
        let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let expires_at = Utc::now() + TimeDelta::seconds(lifetime);
        info!(
            "Obtained access token via {:?}, valid until {}",
            self.credentials, expires_at
        );

        let value = response.access_token;
        *cache = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let request = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let assertion = sign_assertion(key, Utc::now())?;
                self.client.post(&key.token_uri).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            }
            Credentials::AuthorizedUser(user) => self.client.post(&user.token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ]),
            Credentials::MetadataServer { host } => self
                .client
                .get(format!(
                    "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                    host
                ))
                .header("Metadata-Flavor", "Google"),
            Credentials::Anonymous | Credentials::AccessToken(_) => {
                return Err(anyhow!("{:?} credentials have no token endpoint", self.credentials))
            }
        };

        let response = request.send().await.context("token request failed")?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Token endpoint response status: {}", status);

        if !status.is_success() {
            return Err(anyhow!(
                "credentials rejected with status {}: {}",
                status,
                body
            ));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
