use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::WorkspaceRef;
use crate::error::WaphlError;
use crate::gcloud::AccessToken;
use crate::store;

const PAGE_SIZE: usize = 2000;

/// Workspace API: entity table discovery and export.
pub trait TerraClient: Send + Sync {
    fn list_entity_types(&self, workspace: &WorkspaceRef) -> Result<Vec<String>, WaphlError>;
    /// Writes the whole entity table as TSV to `destination`.
    fn export_table(
        &self,
        workspace: &WorkspaceRef,
        entity_type: &str,
        destination: &Path,
    ) -> Result<(), WaphlError>;
}

#[derive(Clone)]
pub struct TerraHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityQueryPage {
    #[serde(default)]
    results: Vec<Entity>,
    result_metadata: ResultMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultMetadata {
    filtered_page_count: usize,
}

impl TerraHttpClient {
    pub fn new(token: &AccessToken) -> Result<Self, WaphlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("waphl-tools/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WaphlError::TerraHttp(err.to_string()))?,
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
            .map_err(|err| WaphlError::TerraHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://api.firecloud.org/api".to_string(),
        })
    }

    fn workspace_url(&self, workspace: &WorkspaceRef) -> String {
        format!(
            "{}/workspaces/{}/{}",
            self.base_url,
            urlencoding::encode(&workspace.namespace),
            urlencoding::encode(&workspace.name)
        )
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, WaphlError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|err| WaphlError::TerraHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Terra request failed".to_string());
            return Err(WaphlError::TerraStatus { status, message });
        }
        response
            .json()
            .map_err(|err| WaphlError::TerraHttp(err.to_string()))
    }

    fn fetch_entities(
        &self,
        workspace: &WorkspaceRef,
        entity_type: &str,
    ) -> Result<Vec<Entity>, WaphlError> {
        let url = format!(
            "{}/entityQuery/{}",
            self.workspace_url(workspace),
            urlencoding::encode(entity_type)
        );
        let mut entities = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: EntityQueryPage = self.get_json(
                &url,
                &[
                    ("page", page.to_string()),
                    ("pageSize", PAGE_SIZE.to_string()),
                ],
            )?;
            tracing::debug!(entity_type, page, rows = batch.results.len(), "fetched page");
            entities.extend(batch.results);
            if page >= batch.result_metadata.filtered_page_count {
                break;
            }
            page += 1;
        }
        Ok(entities)
    }
}

impl TerraClient for TerraHttpClient {
    fn list_entity_types(&self, workspace: &WorkspaceRef) -> Result<Vec<String>, WaphlError> {
        let url = format!("{}/entities", self.workspace_url(workspace));
        let types: BTreeMap<String, Value> = self.get_json(&url, &[])?;
        Ok(types.into_keys().collect())
    }

    fn export_table(
        &self,
        workspace: &WorkspaceRef,
        entity_type: &str,
        destination: &Path,
    ) -> Result<(), WaphlError> {
        let entities = self.fetch_entities(workspace, entity_type)?;
        let content = render_entities_tsv(entity_type, &entities)?;
        store::write_bytes_atomic(destination, &content)
    }
}

/// Renders entities the way Terra's table download does: an
/// `entity:<type>_id` column followed by every attribute name, sorted.
pub fn render_entities_tsv(entity_type: &str, entities: &[Entity]) -> Result<Vec<u8>, WaphlError> {
    let columns = entities
        .iter()
        .flat_map(|entity| entity.attributes.keys().cloned())
        .collect::<BTreeSet<_>>();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    let mut header = vec![format!("entity:{entity_type}_id")];
    header.extend(columns.iter().cloned());
    writer
        .write_record(&header)
        .map_err(|err| WaphlError::Table(err.to_string()))?;

    for entity in entities {
        let mut record = vec![entity.name.clone()];
        record.extend(columns.iter().map(|column| {
            entity
                .attributes
                .get(column)
                .map(render_attribute)
                .unwrap_or_default()
        }));
        writer
            .write_record(&record)
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))
}

fn render_attribute(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Object(map) => {
            if let Some(items) = map.get("items") {
                items.to_string()
            } else if let Some(Value::String(name)) = map.get("entityName") {
                name.clone()
            } else {
                value.to_string()
            }
        }
        Value::Array(_) => value.to_string(),
    }
}
