use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;

use super::{Backend, BackendError, BackendProvider, EmailMessage, EntityKind, LlmRequest, User};
use crate::config::BackendConfig;
use crate::media::MediaFile;

// Inference on five frames can take a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the hosted app platform.
#[derive(Clone)]
pub struct Base44Client {
    client: Client,
    api_url: String,
    app_id: String,
    token: Option<String>,
}

impl Base44Client {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            token: None,
        })
    }

    /// Same connection pool, different caller.
    pub fn with_token(&self, token: Option<&str>) -> Self {
        Self {
            token: token.map(str::to_string),
            ..self.clone()
        }
    }

    fn app_url(&self, path: &str) -> String {
        format!("{}/api/apps/{}/{}", self.api_url, self.app_id, path)
    }

    fn entity_url(&self, entity: EntityKind, id: Option<&str>) -> String {
        match id {
            Some(id) => self.app_url(&format!("entities/{}/{}", entity.name(), id)),
            None => self.app_url(&format!("entities/{}", entity.name())),
        }
    }

    fn integration_url(&self, endpoint: &str) -> String {
        self.app_url(&format!("integration-endpoints/Core/{endpoint}"))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("X-App-Id", &self.app_id);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, BackendError> {
        let res = self.authorize(req).send().await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &text));
        }

        let text = res.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn send_list(&self, req: RequestBuilder) -> Result<Vec<Value>, BackendError> {
        match self.send(req).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(BackendError::Decode(format!(
                "expected a list, got {}",
                kind_of(&other)
            ))),
        }
    }

    async fn send_user(&self, req: RequestBuilder) -> Result<User, BackendError> {
        let json = self.send(req).await?;
        serde_json::from_value(json).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn list_query(sort: Option<&str>, limit: Option<u32>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(sort) = sort {
        query.push(("sort", sort.to_string()));
    }
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    query
}

#[async_trait]
impl Backend for Base44Client {
    async fn list(&self, entity: EntityKind, sort: Option<&str>, limit: Option<u32>) -> Result<Vec<Value>, BackendError> {
        let req = self
            .client
            .get(self.entity_url(entity, None))
            .query(&list_query(sort, limit));
        self.send_list(req).await
    }

    async fn filter(&self, entity: EntityKind, query: Value, sort: Option<&str>) -> Result<Vec<Value>, BackendError> {
        let mut params = list_query(sort, None);
        params.push(("q", query.to_string()));
        let req = self.client.get(self.entity_url(entity, None)).query(&params);
        self.send_list(req).await
    }

    async fn get(&self, entity: EntityKind, id: &str) -> Result<Value, BackendError> {
        self.send(self.client.get(self.entity_url(entity, Some(id)))).await
    }

    async fn create(&self, entity: EntityKind, data: Value) -> Result<Value, BackendError> {
        self.send(self.client.post(self.entity_url(entity, None)).json(&data))
            .await
    }

    async fn update(&self, entity: EntityKind, id: &str, data: Value) -> Result<Value, BackendError> {
        self.send(self.client.put(self.entity_url(entity, Some(id))).json(&data))
            .await
    }

    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), BackendError> {
        self.send(self.client.delete(self.entity_url(entity, Some(id))))
            .await
            .map(|_| ())
    }

    async fn me(&self) -> Result<User, BackendError> {
        self.send_user(self.client.get(self.app_url("entities/User/me")))
            .await
    }

    async fn update_me(&self, data: Value) -> Result<User, BackendError> {
        self.send_user(self.client.put(self.app_url("entities/User/me")).json(&data))
            .await
    }

    async fn upload_file(&self, file: &MediaFile) -> Result<String, BackendError> {
        let part = reqwest::multipart::Part::bytes(file.data.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&file.effective_content_type())
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let json = self
            .send(self.client.post(self.integration_url("UploadFile")).multipart(form))
            .await?;
        json["file_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Decode("no file_url in upload response".into()))
    }

    async fn invoke_llm(&self, request: &LlmRequest) -> Result<Value, BackendError> {
        self.send(self.client.post(self.integration_url("InvokeLLM")).json(request))
            .await
    }

    async fn send_email(&self, email: &EmailMessage) -> Result<(), BackendError> {
        self.send(self.client.post(self.integration_url("SendEmail")).json(email))
            .await
            .map(|_| ())
    }
}

/// One shared connection pool; a token-scoped client per request.
pub struct Base44Provider {
    base: Base44Client,
}

impl Base44Provider {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            base: Base44Client::new(config)?,
        })
    }
}

impl BackendProvider for Base44Provider {
    fn session(&self, token: Option<&str>) -> Arc<dyn Backend> {
        Arc::new(self.base.with_token(token))
    }

    fn login_url(&self, return_to: &str) -> String {
        login_url(&self.base.api_url, &self.base.app_id, return_to)
    }

    fn logout_url(&self, return_to: &str) -> String {
        platform_url(&self.base.api_url, "logout", &self.base.app_id, return_to)
    }
}

fn login_url(api_url: &str, app_id: &str, return_to: &str) -> String {
    platform_url(api_url, "login", app_id, return_to)
}

/// `{api_url}/{page}?app_id=..&from_url=..` with both values form-encoded.
fn platform_url(api_url: &str, page: &str, app_id: &str, return_to: &str) -> String {
    let raw = format!("{}/{page}", api_url.trim_end_matches('/'));
    match Url::parse(&raw) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("app_id", app_id)
                .append_pair("from_url", return_to);
            url.into()
        }
        Err(e) => {
            tracing::warn!(error = %e, url = %raw, "Platform URL is not valid");
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Base44Client {
        Base44Client::new(&BackendConfig {
            api_url: "https://base44.app/".into(),
            app_id: "app123".into(),
        })
        .unwrap()
    }

    #[test]
    fn urls_are_scoped_to_the_app() {
        let c = client();
        assert_eq!(
            c.entity_url(EntityKind::VaccinationRecord, Some("r1")),
            "https://base44.app/api/apps/app123/entities/VaccinationRecord/r1"
        );
        assert_eq!(
            c.integration_url("InvokeLLM"),
            "https://base44.app/api/apps/app123/integration-endpoints/Core/InvokeLLM"
        );
    }

    #[test]
    fn login_url_encodes_the_return_path() {
        assert_eq!(
            login_url("https://base44.app", "app123", "/history?page=2"),
            "https://base44.app/login?app_id=app123&from_url=%2Fhistory%3Fpage%3D2"
        );
    }

    #[test]
    fn return_paths_survive_reserved_characters() {
        let raw = platform_url("https://base44.app/", "logout", "app123", "/pets/Ñoño?a=1&b=2#top");
        let url = Url::parse(&raw).unwrap();
        assert_eq!(url.path(), "/logout");
        assert!(url.fragment().is_none());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("app_id".to_string(), "app123".to_string()),
                ("from_url".to_string(), "/pets/Ñoño?a=1&b=2#top".to_string()),
            ]
        );
    }

    #[test]
    fn sessions_share_config_but_not_tokens() {
        let c = client();
        let a = c.with_token(Some("abc"));
        assert_eq!(a.token.as_deref(), Some("abc"));
        assert!(c.token.is_none());
        assert_eq!(a.app_id, "app123");
    }
}
