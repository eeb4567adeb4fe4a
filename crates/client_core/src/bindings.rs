//! [`Action`] bindings for the backend endpoints.
//!
//! Inputs are validated by their constructors before they ever reach a
//! controller; the controller itself never inspects domain semantics.

use async_trait::async_trait;
use shared::{
    domain::{
        has_allowed_extension, EntryId, FileUpload, ReportId, CATEGORIZE_EXTENSIONS,
        TABULAR_EXTENSIONS,
    },
    protocol::{
        AnalysisResponse, CategorizeResponse, CreateReportRequest, DeleteResponse,
        HistoricalDataResponse, Report, ReportListResponse,
    },
};
use thiserror::Error;

use crate::{action::Action, backend::BackendClient, error::ActionError, state::RequestToken};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("'{filename}' is not a supported file; expected one of: {expected}")]
    UnsupportedFile { filename: String, expected: String },
    #[error("'{0}' is empty")]
    EmptyFile(String),
}

fn check_upload(upload: &FileUpload, allowed: &[&str]) -> Result<(), InputError> {
    if !has_allowed_extension(upload, allowed) {
        return Err(InputError::UnsupportedFile {
            filename: upload.filename.clone(),
            expected: allowed.join(", "),
        });
    }
    if upload.bytes.is_empty() {
        return Err(InputError::EmptyFile(upload.filename.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage(String);

impl ChatMessage {
    pub fn new(text: &str) -> Result<Self, InputError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InputError::EmptyMessage);
        }
        Ok(Self(text.to_string()))
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

/// A chat exchange; carries the prompt so transcripts stay in trigger order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatExchange {
    pub prompt: String,
    pub reply: String,
}

pub struct ChatAction {
    client: BackendClient,
}

impl ChatAction {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for ChatAction {
    type Input = ChatMessage;
    type Output = ChatExchange;

    fn name(&self) -> &'static str {
        "send_chat_message"
    }

    async fn perform(
        &self,
        input: ChatMessage,
        _token: RequestToken,
    ) -> Result<ChatExchange, ActionError> {
        let response = self.client.chat(input.text()).await?;
        Ok(ChatExchange {
            prompt: input.0,
            reply: response.message,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularUpload(FileUpload);

impl TabularUpload {
    pub fn new(upload: FileUpload) -> Result<Self, InputError> {
        check_upload(&upload, TABULAR_EXTENSIONS)?;
        Ok(Self(upload))
    }

    pub fn filename(&self) -> &str {
        &self.0.filename
    }
}

/// What the analysis controller should analyze: a fresh upload, or a stored
/// entry named explicitly by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    Upload(TabularUpload),
    Reanalyze(EntryId),
}

pub struct AnalyzeAction {
    client: BackendClient,
}

impl AnalyzeAction {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for AnalyzeAction {
    type Input = AnalysisRequest;
    type Output = AnalysisResponse;

    fn name(&self) -> &'static str {
        "analyze_upload"
    }

    async fn perform(
        &self,
        input: AnalysisRequest,
        _token: RequestToken,
    ) -> Result<AnalysisResponse, ActionError> {
        match input {
            AnalysisRequest::Upload(TabularUpload(upload)) => {
                self.client.upload_excel(upload).await
            }
            AnalysisRequest::Reanalyze(entry_id) => self.client.reanalyze(&entry_id).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizeInput {
    reference: FileUpload,
    target: FileUpload,
}

impl CategorizeInput {
    pub fn new(reference: FileUpload, target: FileUpload) -> Result<Self, InputError> {
        check_upload(&reference, CATEGORIZE_EXTENSIONS)?;
        check_upload(&target, CATEGORIZE_EXTENSIONS)?;
        Ok(Self { reference, target })
    }
}

pub struct CategorizeAction {
    client: BackendClient,
}

impl CategorizeAction {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for CategorizeAction {
    type Input = CategorizeInput;
    type Output = CategorizeResponse;

    fn name(&self) -> &'static str {
        "categorize"
    }

    async fn perform(
        &self,
        input: CategorizeInput,
        _token: RequestToken,
    ) -> Result<CategorizeResponse, ActionError> {
        self.client
            .rag_categorize(input.reference, input.target)
            .await
    }
}

/// Operations on stored reports and history entries.
#[derive(Debug, Clone)]
pub enum ArchiveRequest {
    CreateReport(CreateReportRequest),
    ListReports,
    ViewReport(ReportId),
    DeleteReport(ReportId),
    ListHistory,
    DeleteHistory(EntryId),
    DownloadResult { download_url: String },
}

#[derive(Debug, Clone)]
pub enum ArchiveResponse {
    Report(Report),
    Reports(ReportListResponse),
    History(HistoricalDataResponse),
    Deleted(DeleteResponse),
    Download(Vec<u8>),
}

pub struct ArchiveAction {
    client: BackendClient,
}

impl ArchiveAction {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for ArchiveAction {
    type Input = ArchiveRequest;
    type Output = ArchiveResponse;

    fn name(&self) -> &'static str {
        "archive"
    }

    async fn perform(
        &self,
        input: ArchiveRequest,
        _token: RequestToken,
    ) -> Result<ArchiveResponse, ActionError> {
        let response = match input {
            ArchiveRequest::CreateReport(request) => {
                ArchiveResponse::Report(self.client.create_weekly_report(&request).await?)
            }
            ArchiveRequest::ListReports => {
                ArchiveResponse::Reports(self.client.list_reports().await?)
            }
            ArchiveRequest::ViewReport(report_id) => {
                ArchiveResponse::Report(self.client.get_report(&report_id).await?)
            }
            ArchiveRequest::DeleteReport(report_id) => {
                ArchiveResponse::Deleted(self.client.delete_report(&report_id).await?)
            }
            ArchiveRequest::ListHistory => {
                ArchiveResponse::History(self.client.historical_data().await?)
            }
            ArchiveRequest::DeleteHistory(entry_id) => {
                ArchiveResponse::Deleted(self.client.delete_historical_data(&entry_id).await?)
            }
            ArchiveRequest::DownloadResult { download_url } => {
                ArchiveResponse::Download(self.client.download(&download_url).await?)
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_is_trimmed_and_must_not_be_blank() {
        assert_eq!(ChatMessage::new("   "), Err(InputError::EmptyMessage));
        assert_eq!(ChatMessage::new("  hi there\n").expect("message").text(), "hi there");
    }

    #[test]
    fn uploads_are_checked_against_the_endpoint_extensions() {
        let xml = FileUpload::new("reference.xml", b"<r/>".to_vec());
        let csv = FileUpload::new("week.csv", b"task,category".to_vec());

        assert!(TabularUpload::new(csv.clone()).is_ok());
        assert!(matches!(
            TabularUpload::new(xml.clone()),
            Err(InputError::UnsupportedFile { .. })
        ));
        assert!(CategorizeInput::new(xml.clone(), xml.clone()).is_ok());
        assert_eq!(
            CategorizeInput::new(xml, FileUpload::new("target.xml", Vec::new())),
            Err(InputError::EmptyFile("target.xml".to_string()))
        );
    }
}
