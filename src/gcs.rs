use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::GcsUri;
use crate::error::WaphlError;
use crate::gcloud::AccessToken;

/// Source object store.
pub trait GcsClient: Send + Sync {
    fn created_at(&self, uri: &GcsUri) -> Result<DateTime<Utc>, WaphlError>;
    fn download(&self, uri: &GcsUri, destination: &Path) -> Result<(), WaphlError>;
}

#[derive(Clone)]
pub struct GcsHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    time_created: String,
}

impl GcsHttpClient {
    pub fn new(token: &AccessToken) -> Result<Self, WaphlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("waphl-tools/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WaphlError::GcsHttp(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token.bearer())
                .map_err(|err| WaphlError::AccessToken(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| WaphlError::GcsHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://storage.googleapis.com/storage/v1".to_string(),
        })
    }

    fn object_url(&self, uri: &GcsUri) -> String {
        format!(
            "{}/b/{}/o/{}",
            self.base_url,
            uri.bucket(),
            urlencoding::encode(uri.object())
        )
    }

    fn get(&self, url: &str, media: bool) -> Result<reqwest::blocking::Response, WaphlError> {
        let mut request = self.client.get(url);
        if media {
            request = request.query(&[("alt", "media")]);
        }
        let response = request
            .send()
            .map_err(|err| WaphlError::GcsHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GCS request failed".to_string());
            return Err(WaphlError::GcsStatus { status, message });
        }
        Ok(response)
    }
}

impl GcsClient for GcsHttpClient {
    fn created_at(&self, uri: &GcsUri) -> Result<DateTime<Utc>, WaphlError> {
        let resource: ObjectResource = self
            .get(&self.object_url(uri), false)?
            .json()
            .map_err(|err| WaphlError::GcsHttp(err.to_string()))?;
        parse_time_created(&resource.time_created)
    }

    fn download(&self, uri: &GcsUri, destination: &Path) -> Result<(), WaphlError> {
        let mut response = self.get(&self.object_url(uri), true)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| WaphlError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| WaphlError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| WaphlError::GcsHttp(err.to_string()))?;
        Ok(())
    }
}

fn parse_time_created(value: &str) -> Result<DateTime<Utc>, WaphlError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| WaphlError::GcsHttp(format!("bad timeCreated {value}: {err}")))
}
