//! Terminal render hooks for the analysis, categorize and archive controllers.

use client_core::{ActionError, ArchiveResponse, RenderHooks};
use shared::protocol::{AnalysisResponse, CategorizeResponse, Comparison};

fn render_failure(error: &ActionError) {
    match error.status() {
        Some(status) => eprintln!("error ({status}): {error}"),
        None => eprintln!("error: {error}"),
    }
}

pub struct AnalysisView;

impl RenderHooks<AnalysisResponse> for AnalysisView {
    fn on_pending(&mut self) {
        eprintln!("... analyzing");
    }

    fn on_success(&mut self, response: &AnalysisResponse) {
        let current = &response.analysis.current_data;
        let label = if response.reanalyzed { " (reanalyzed)" } else { "" };
        println!("{}{label}", response.file_name);
        if let Some(entry_id) = &response.saved_entry_id {
            println!("saved as entry {entry_id}");
        }
        println!("{} tasks as of {}", current.total_tasks, current.date);

        let mut categories: Vec<_> = current.categories.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, count) in categories {
            println!("  {category:<32} {count:>6}");
        }

        match &response.analysis.comparison {
            Some(comparison) => render_comparison(comparison),
            None => {
                if let Some(message) = &response.analysis.no_data_message {
                    println!("{message}");
                }
            }
        }
        if let Some(trend) = &response.analysis.historical_trend {
            println!(
                "trend over {} weeks: {}",
                trend.weekly_trend.len(),
                trend.trend_direction
            );
        }
        if let Some(comment) = &response.ai_comment {
            println!("\n{comment}");
        }

        let charts: Vec<_> = response.charts.iter().map(|(name, _)| name).collect();
        if !charts.is_empty() {
            println!("charts: {}", charts.join(", "));
        }
    }

    fn on_failure(&mut self, error: &ActionError) {
        render_failure(error);
    }
}

fn render_comparison(comparison: &Comparison) {
    let totals = &comparison.totals;
    println!(
        "total {:.1} -> {:.1} ({:+.1}, {:+.1}%)",
        totals.baseline_total, totals.current_total, totals.change, totals.change_percent
    );
    for delta in &comparison.categories {
        println!(
            "  {:<32} {:>8.1} -> {:>8.1} {:>+8.1}%",
            delta.category, delta.baseline, delta.current, delta.change_percent
        );
    }
    if let Some(delta) = &comparison.most_increased {
        println!("most increased: {} ({:+.1})", delta.category, delta.change);
    }
    if let Some(delta) = &comparison.most_decreased {
        println!("most decreased: {} ({:+.1})", delta.category, delta.change);
    }
}

pub struct CategorizeView;

impl RenderHooks<CategorizeResponse> for CategorizeView {
    fn on_pending(&mut self) {
        eprintln!("... categorizing");
    }

    fn on_success(&mut self, response: &CategorizeResponse) {
        let stats = &response.stats;
        println!(
            "{} problems, {} categories, {:.1}% average confidence, {:.2}s",
            stats.total_processed,
            stats.categories_found,
            stats.avg_confidence,
            stats.processing_time
        );
        for item in &response.categorized_data {
            println!(
                "  [{:>5.1}%] {:<24} {}",
                item.confidence, item.category, item.problem
            );
        }
        println!("result file: {} ({})", response.filename, response.download_url);
    }

    fn on_failure(&mut self, error: &ActionError) {
        render_failure(error);
    }
}

pub struct ArchiveView;

impl RenderHooks<ArchiveResponse> for ArchiveView {
    fn on_success(&mut self, response: &ArchiveResponse) {
        match response {
            ArchiveResponse::Report(report) => {
                println!("{} [{}] {}", report.id, report.week_start, report.title);
                println!("{}", report.full_report);
            }
            ArchiveResponse::Reports(list) => {
                println!("{} reports", list.total_reports);
                for report in &list.reports {
                    println!("  {}  {}  {}", report.id, report.formatted_date, report.title);
                }
            }
            ArchiveResponse::History(history) => {
                if !history.has_data {
                    println!("no stored weeks");
                    return;
                }
                println!("{} stored weeks", history.total_weeks);
                for week in &history.data {
                    println!(
                        "  {}  week {:>2}  {:>6} tasks  {}",
                        week.id, week.week_number, week.total_tasks, week.display_filename
                    );
                }
            }
            ArchiveResponse::Deleted(deleted) => match deleted.remaining_count {
                Some(remaining) => println!("{} ({remaining} remaining)", deleted.message),
                None => println!("{}", deleted.message),
            },
            ArchiveResponse::Download(bytes) => println!("downloaded {} bytes", bytes.len()),
        }
    }

    fn on_failure(&mut self, error: &ActionError) {
        render_failure(error);
    }
}
