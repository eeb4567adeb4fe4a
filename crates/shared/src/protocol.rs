use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{EntryId, ReportId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub task: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentData {
    pub total_tasks: u64,
    pub categories: BTreeMap<String, u64>,
    pub date: String,
}

/// One category's movement against the historical baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDelta {
    #[serde(rename = "kategori")]
    pub category: String,
    #[serde(rename = "gecen_hafta")]
    pub baseline: f64,
    #[serde(rename = "bu_hafta")]
    pub current: f64,
    #[serde(rename = "degisim")]
    pub change: f64,
    #[serde(rename = "degisim_yuzde")]
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalDelta {
    #[serde(rename = "gecen_hafta_toplam")]
    pub baseline_total: f64,
    #[serde(rename = "bu_hafta_toplam")]
    pub current_total: f64,
    #[serde(rename = "toplam_degisim")]
    pub change: f64,
    #[serde(rename = "toplam_degisim_yuzde")]
    pub change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AverageInfo {
    pub total_weeks_used: u64,
    pub comparison_type: String,
    pub average_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(rename = "kategori_analizi")]
    pub categories: Vec<CategoryDelta>,
    #[serde(rename = "toplam_analiz")]
    pub totals: TotalDelta,
    #[serde(rename = "en_cok_artan", default)]
    pub most_increased: Option<CategoryDelta>,
    #[serde(rename = "en_cok_azalan", default)]
    pub most_decreased: Option<CategoryDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_info: Option<AverageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyTotal {
    pub week_start: Option<String>,
    pub total: u64,
    pub categories: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalTrend {
    pub weekly_trend: Vec<WeeklyTotal>,
    pub trend_direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub current_data: CurrentData,
    #[serde(default)]
    pub comparison: Option<Comparison>,
    #[serde(default)]
    pub historical_trend: Option<HistoricalTrend>,
    #[serde(default)]
    pub has_historical_data: bool,
    #[serde(default)]
    pub total_previous_weeks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data_message: Option<String>,
}

/// Base64-encoded PNG charts rendered by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartImages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<String>,
}

impl ChartImages {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("pie", self.pie.as_deref()),
            ("bar", self.bar.as_deref()),
            ("comparison", self.comparison.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, data)| data.map(|data| (name, data)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub data: Vec<TaskRow>,
    pub analysis: Analysis,
    #[serde(default)]
    pub charts: ChartImages,
    #[serde(default)]
    pub ai_comment: Option<String>,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(default)]
    pub saved_entry_id: Option<EntryId>,
    #[serde(default)]
    pub reanalyzed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizeStats {
    pub total_processed: u64,
    pub categories_found: u64,
    pub avg_confidence: f64,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedItem {
    pub problem: String,
    pub category: String,
    pub confidence: f64,
    pub similar_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizeResponse {
    pub stats: CategorizeStats,
    pub categorized_data: Vec<CategorizedItem>,
    pub download_url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateReportRequest {
    pub incident_info: String,
    pub improvement_suggestions: String,
    pub additional_notes: String,
    pub ai_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_summary: Option<CurrentData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub date: String,
    pub week_start: String,
    pub title: String,
    #[serde(default)]
    pub ai_summary: String,
    #[serde(default)]
    pub incident_info: String,
    #[serde(default)]
    pub improvement_suggestions: String,
    #[serde(default)]
    pub additional_notes: String,
    #[serde(default)]
    pub data_summary: serde_json::Value,
    pub full_report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub report: Report,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: ReportId,
    pub title: String,
    pub date: String,
    pub week_start: String,
    pub formatted_date: String,
    #[serde(default)]
    pub has_incidents: bool,
    #[serde(default)]
    pub has_suggestions: bool,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportListResponse {
    pub reports: Vec<ReportSummary>,
    pub total_reports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalWeek {
    pub id: EntryId,
    pub date: String,
    #[serde(default)]
    pub week_start: Option<String>,
    pub original_filename: String,
    pub display_filename: String,
    pub total_tasks: u64,
    #[serde(default)]
    pub categories: BTreeMap<String, u64>,
    pub upload_date_formatted: String,
    pub week_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalDataResponse {
    pub data: Vec<HistoricalWeek>,
    pub total_weeks: u64,
    pub has_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    #[serde(default)]
    pub remaining_count: Option<u64>,
}
