use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::client::CrmClient;
use super::errors::CrmError;
use super::types::{CrmRecord, ObjectType, SearchFilter};

/// HTTP implementation of [`CrmClient`] against the HubSpot-style v3 object
/// API. Retries on 429/5xx with exponential backoff before giving up.
#[derive(Clone)]
pub struct HttpCrmClient {
    http: Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ObjectEnvelope {
    id: String,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct ResultsEnvelope {
    #[serde(default)]
    results: Vec<ObjectEnvelope>,
}

impl From<ObjectEnvelope> for CrmRecord {
    fn from(env: ObjectEnvelope) -> Self {
        let properties = env
            .properties
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect();

        CrmRecord {
            id: env.id,
            properties,
        }
    }
}

impl HttpCrmClient {
    pub fn new(base_url: String, token: String) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            token,
            max_retries: 3,
        })
    }

    fn object_url(&self, ty: ObjectType) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, ty.type_id())
    }

    /// Sends `build()` until it succeeds or retries are exhausted.
    /// 429 and 5xx responses back off exponentially; everything else is final.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CrmError> {
        let mut attempt = 0u32;
        loop {
            let resp = build()
                .bearer_auth(&self.token)
                .send()
                .await?;

            let status = resp.status();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

            if !retryable || attempt >= self.max_retries {
                return Ok(resp);
            }

            attempt += 1;
            let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
            debug!(status = %status, attempt, "crm throttled; backing off");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, CrmError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(CrmError::api(status.as_u16(), detail))
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    #[instrument(skip(self, properties), fields(ty = ty.type_id(), id = %id), level = "debug")]
    async fn get(
        &self,
        ty: ObjectType,
        id: &str,
        properties: &[&str],
    ) -> Result<Option<CrmRecord>, CrmError> {
        let url = format!("{}/{}", self.object_url(ty), id);
        let props = properties.join(",");

        let resp = self
            .send_with_retry(|| self.http.get(&url).query(&[("properties", props.as_str())]))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let env: ObjectEnvelope = Self::expect_ok(resp).await?.json().await?;
        Ok(Some(env.into()))
    }

    #[instrument(skip(self, properties), fields(ty = ty.type_id()), level = "debug")]
    async fn create(
        &self,
        ty: ObjectType,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError> {
        let url = self.object_url(ty);
        let body = json!({ "properties": properties });

        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;

        let env: ObjectEnvelope = Self::expect_ok(resp).await?.json().await?;
        debug!(crm_id = %env.id, "crm object created");
        Ok(env.into())
    }

    #[instrument(skip(self, properties), fields(ty = ty.type_id(), id = %id), level = "debug")]
    async fn update(
        &self,
        ty: ObjectType,
        id: &str,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError> {
        let url = format!("{}/{}", self.object_url(ty), id);
        let body = json!({ "properties": properties });

        let resp = self
            .send_with_retry(|| self.http.patch(&url).json(&body))
            .await?;

        let env: ObjectEnvelope = Self::expect_ok(resp).await?.json().await?;
        Ok(env.into())
    }

    #[instrument(skip(self), fields(ty = ty.type_id(), id = %id), level = "debug")]
    async fn delete(&self, ty: ObjectType, id: &str) -> Result<(), CrmError> {
        let url = format!("{}/{}", self.object_url(ty), id);
        let resp = self.send_with_retry(|| self.http.delete(&url)).await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    #[instrument(skip(self, filters, properties), fields(ty = ty.type_id()), level = "debug")]
    async fn search(
        &self,
        ty: ObjectType,
        filters: &[SearchFilter],
        properties: &[&str],
        limit: u32,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let url = format!("{}/search", self.object_url(ty));
        let body = json!({
            "filterGroups": [{
                "filters": filters.iter().map(|f| json!({
                    "propertyName": f.property,
                    "operator": f.op.as_str(),
                    "value": f.value,
                })).collect::<Vec<_>>(),
            }],
            "properties": properties,
            "limit": limit,
        });

        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;

        let env: ResultsEnvelope = Self::expect_ok(resp).await?.json().await?;
        Ok(env.results.into_iter().map(Into::into).collect())
    }

    async fn batch_read(
        &self,
        ty: ObjectType,
        ids: &[String],
        properties: &[&str],
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let url = format!("{}/batch/read", self.object_url(ty));
        let body = json!({
            "inputs": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
            "properties": properties,
        });

        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;

        let env: ResultsEnvelope = Self::expect_ok(resp).await?.json().await?;
        Ok(env.results.into_iter().map(Into::into).collect())
    }

    async fn batch_update(
        &self,
        ty: ObjectType,
        updates: Vec<(String, HashMap<String, String>)>,
    ) -> Result<(), CrmError> {
        let url = format!("{}/batch/update", self.object_url(ty));
        let body = json!({
            "inputs": updates.iter().map(|(id, props)| json!({
                "id": id,
                "properties": props,
            })).collect::<Vec<_>>(),
        });

        let resp = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;

        Self::expect_ok(resp).await?;
        Ok(())
    }

    async fn associate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError> {
        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/default/{}/{}",
            self.base_url,
            from.type_id(),
            from_id,
            to.type_id(),
            to_id
        );

        let resp = self.send_with_retry(|| self.http.put(&url)).await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    async fn associations_of(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
    ) -> Result<Vec<String>, CrmError> {
        #[derive(Deserialize)]
        struct AssociationEdge {
            #[serde(rename = "toObjectId")]
            to_object_id: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct AssociationResults {
            #[serde(default)]
            results: Vec<AssociationEdge>,
        }

        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/{}",
            self.base_url,
            from.type_id(),
            from_id,
            to.type_id()
        );

        let resp = self.send_with_retry(|| self.http.get(&url)).await?;
        let env: AssociationResults = Self::expect_ok(resp).await?.json().await?;

        Ok(env
            .results
            .into_iter()
            .map(|e| match e.to_object_id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect())
    }

    async fn disassociate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError> {
        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/{}/{}",
            self.base_url,
            from.type_id(),
            from_id,
            to.type_id(),
            to_id
        );

        let resp = self.send_with_retry(|| self.http.delete(&url)).await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }
}
