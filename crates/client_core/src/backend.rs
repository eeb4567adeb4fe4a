//! HTTP client for the task desk backend.
//!
//! Every call is normalized into `Result<T, ActionError>` so a binding can hand
//! it straight to a controller.

use reqwest::{
    multipart::{Form, Part},
    Client, Method, RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{EntryId, FileUpload, ReportId},
    error::{ErrorBody, ResponseEnvelope},
    protocol::{
        AnalysisResponse, CategorizeResponse, ChatRequest, ChatResponse, CreateReportRequest,
        DeleteResponse, HistoricalDataResponse, Report, ReportEnvelope, ReportListResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::error::ActionError;

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, ActionError> {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, raw_url: &str) -> Result<Self, ActionError> {
        let mut base_url = Url::parse(raw_url.trim())
            .map_err(|err| ActionError::transport(format!("invalid backend url '{raw_url}': {err}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn chat(&self, message: &str) -> Result<ChatResponse, ActionError> {
        let request = self
            .request(Method::POST, "chat")?
            .json(&ChatRequest {
                message: message.to_string(),
            });
        send_json(request).await
    }

    pub async fn upload_excel(&self, file: FileUpload) -> Result<AnalysisResponse, ActionError> {
        let form = Form::new().part("file", file_part(file)?);
        send_json(self.request(Method::POST, "upload_excel")?.multipart(form)).await
    }

    pub async fn reanalyze(&self, entry_id: &EntryId) -> Result<AnalysisResponse, ActionError> {
        let path = format!("reanalyze_data/{}", entry_id.as_str());
        send_json(self.request(Method::POST, &path)?).await
    }

    pub async fn rag_categorize(
        &self,
        reference: FileUpload,
        target: FileUpload,
    ) -> Result<CategorizeResponse, ActionError> {
        let form = Form::new()
            .part("reference_file", file_part(reference)?)
            .part("target_file", file_part(target)?);
        send_json(self.request(Method::POST, "rag_categorize")?.multipart(form)).await
    }

    /// Fetches the result file a categorization run produced.
    pub async fn download(&self, download_url: &str) -> Result<Vec<u8>, ActionError> {
        let url = self.resolve(download_url.trim_start_matches('/'))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(rejection(status, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn create_weekly_report(
        &self,
        request: &CreateReportRequest,
    ) -> Result<Report, ActionError> {
        let envelope: ReportEnvelope =
            send_json(self.request(Method::POST, "create_weekly_report")?.json(request)).await?;
        Ok(envelope.report)
    }

    pub async fn list_reports(&self) -> Result<ReportListResponse, ActionError> {
        send_json(self.request(Method::GET, "get_reports")?).await
    }

    pub async fn get_report(&self, report_id: &ReportId) -> Result<Report, ActionError> {
        let path = format!("get_report/{}", report_id.as_str());
        let envelope: ReportEnvelope = send_json(self.request(Method::GET, &path)?).await?;
        Ok(envelope.report)
    }

    pub async fn delete_report(&self, report_id: &ReportId) -> Result<DeleteResponse, ActionError> {
        let path = format!("delete_report/{}", report_id.as_str());
        send_json(self.request(Method::DELETE, &path)?).await
    }

    pub async fn historical_data(&self) -> Result<HistoricalDataResponse, ActionError> {
        send_json(self.request(Method::GET, "get_historical_data")?).await
    }

    pub async fn delete_historical_data(
        &self,
        entry_id: &EntryId,
    ) -> Result<DeleteResponse, ActionError> {
        let path = format!("delete_historical_data/{}", entry_id.as_str());
        send_json(self.request(Method::DELETE, &path)?).await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ActionError> {
        let url = self.resolve(path)?;
        debug!(method = method.as_str(), url = url.as_str(), "backend request");
        Ok(self.http.request(method, url))
    }

    fn resolve(&self, path: &str) -> Result<Url, ActionError> {
        self.base_url
            .join(path)
            .map_err(|err| ActionError::transport(format!("invalid backend path '{path}': {err}")))
    }
}

fn file_part(file: FileUpload) -> Result<Part, ActionError> {
    let part = Part::bytes(file.bytes).file_name(file.filename);
    match file.mime_type {
        Some(mime) => part
            .mime_str(&mime)
            .map_err(|err| ActionError::application(format!("invalid mime type '{mime}': {err}"))),
        None => Ok(part),
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ActionError> {
    let response = request.send().await?;
    decode_response(response).await
}

/// Maps a backend response onto the error taxonomy.
///
/// 2xx bodies flagged with `success: false` or an `error` field are
/// application failures; 2xx bodies that do not decode are transport failures.
/// Non-2xx statuses are application failures when they carry `{error}` and
/// transport failures otherwise.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, ActionError> {
    let status = response.status();
    if !status.is_success() {
        return Err(rejection(status, response).await);
    }

    let body = response.bytes().await?;
    let envelope: ResponseEnvelope = serde_json::from_slice(&body).unwrap_or_default();
    if let Some(reason) = envelope.failure_reason() {
        return Err(ActionError::Application {
            message: reason,
            status: Some(status.as_u16()),
        });
    }
    Ok(serde_json::from_slice(&body)?)
}

async fn rejection(status: StatusCode, response: Response) -> ActionError {
    let body = response.bytes().await.unwrap_or_default();
    match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => ActionError::Application {
            message: error,
            status: Some(status.as_u16()),
        },
        Err(_) => ActionError::Transport {
            message: format!("backend responded with {status}"),
            status: Some(status.as_u16()),
        },
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
