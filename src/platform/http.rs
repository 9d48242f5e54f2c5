use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Credentials;
use crate::error::{Result, SeedError};
use crate::platform::{NewPatient, PatientRecord, PlatformApi, Session, SESSION_TOKEN_HEADER};

/// `PlatformApi` over HTTPS.
pub struct HttpPlatform {
    client: Client,
    base: String,
}

#[derive(Deserialize, Debug, Default)]
struct LoginBody {
    #[serde(default)]
    userid: Option<String>,
}

impl HttpPlatform {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SeedError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self> {
        Self::new(&creds.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authed(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header("Accept", "application/json")
            .header(SESSION_TOKEN_HEADER, &session.token)
    }

    async fn send(op: &'static str, builder: RequestBuilder) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| SeedError::transport(op, None, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = status.canonical_reason().unwrap_or("error");
            return Err(SeedError::transport(
                op,
                Some(status.as_u16()),
                format!("{} {} {}", status.as_u16(), reason, body.trim()),
            ));
        }
        Ok(resp)
    }
}

/// Pull `data.id` out of a create-dataset response body.
pub fn extract_dataset_id(body: &Value) -> Result<String> {
    body.get("data")
        .and_then(|d| d.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SeedError::protocol("create_dataset", "response has no data.id"))
}

#[async_trait]
impl PlatformApi for HttpPlatform {
    async fn login(&self, creds: &Credentials) -> Result<Session> {
        let req = self
            .client
            .post(self.url("/auth/login"))
            .header("Content-Type", "application/json")
            .basic_auth(&creds.user_name, Some(&creds.password));
        let resp = Self::send("login", req).await?;
        let token = resp
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SeedError::protocol("login", "no session token in response headers"))?;
        let body: LoginBody = resp.json().await.unwrap_or_default();
        Ok(Session { token, user_id: body.userid })
    }

    async fn create_patient(&self, session: &Session, clinic_id: &str, patient: &NewPatient) -> Result<PatientRecord> {
        let url = self.url(&format!("/v1/clinics/{}/patients", clinic_id));
        let req = self.authed(self.client.post(url), session).json(patient);
        let resp = Self::send("create_patient", req).await?;
        resp.json::<PatientRecord>()
            .await
            .map_err(|e| SeedError::protocol("create_patient", format!("unreadable patient body: {}", e)))
    }

    async fn assign_tag(&self, session: &Session, clinic_id: &str, tag_id: &str, patient_ids: &[String]) -> Result<u16> {
        let url = self.url(&format!("/v1/clinics/{}/patients/assign_tag/{}", clinic_id, tag_id));
        let req = self.authed(self.client.post(url), session).json(patient_ids);
        let resp = Self::send("assign_tag", req).await?;
        Ok(resp.status().as_u16())
    }

    async fn patient_visible(&self, session: &Session, clinic_id: &str, patient_id: &str) -> Result<bool> {
        let url = self.url(&format!("/v1/clinics/{}/patients/{}", clinic_id, patient_id));
        let resp = self
            .authed(self.client.get(url), session)
            .send()
            .await
            .map_err(|e| SeedError::transport("patient_visible", None, e.to_string()))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(true),
            404 => Ok(false),
            s => Err(SeedError::transport("patient_visible", Some(s), "unexpected status")),
        }
    }

    async fn create_dataset(&self, session: &Session, user_id: &str, metadata: &Value) -> Result<String> {
        let url = self.url(&format!("/v1/users/{}/datasets", user_id));
        let req = self.authed(self.client.post(url), session).json(metadata);
        let resp = Self::send("create_dataset", req).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SeedError::protocol("create_dataset", format!("unreadable body: {}", e)))?;
        extract_dataset_id(&body)
    }

    async fn upload_data(&self, session: &Session, dataset_id: &str, payload: &Value) -> Result<u16> {
        let url = self.url(&format!("/dataservices/v1/datasets/{}/data", dataset_id));
        let req = self.authed(self.client.post(url), session).json(payload);
        let resp = Self::send("upload_data", req).await?;
        Ok(resp.status().as_u16())
    }

    async fn close_dataset(&self, session: &Session, dataset_id: &str) -> Result<u16> {
        let url = self.url(&format!("/dataservices/v1/datasets/{}", dataset_id));
        let req = self
            .authed(self.client.put(url), session)
            .json(&json!({ "dataState": "closed" }));
        let resp = Self::send("close_dataset", req).await?;
        Ok(resp.status().as_u16())
    }

    async fn delete_user(&self, session: &Session, user_id: &str, password: &str) -> Result<u16> {
        let url = self.url(&format!("/v1/users/{}", user_id));
        let req = self
            .authed(self.client.delete(url), session)
            .json(&json!({ "password": password }));
        let resp = Self::send("delete_user", req).await?;
        Ok(resp.status().as_u16())
    }

    async fn delete_clinic_patient(&self, session: &Session, clinic_id: &str, patient_id: &str, password: &str) -> Result<u16> {
        let url = self.url(&format!("/v1/clinics/{}/patients/{}", clinic_id, patient_id));
        let req = self
            .authed(self.client.delete(url), session)
            .json(&json!({ "password": password }));
        let resp = Self::send("delete_clinic_patient", req).await?;
        Ok(resp.status().as_u16())
    }
}
