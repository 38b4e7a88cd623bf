// src/processor.rs
//! Turns pending technical notes into stored summaries.

use std::collections::BTreeMap;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::db::models::{
    LogLevel, NewProcessingLog, NewSummary, NoteStatus, Operation, ProcessedSummary,
    ProcessingLog, TechnicalNote,
};
use crate::error::{DigestError, Result};
use crate::summarize::{DynSummarizer, ImpactAnalysis, ImpactInput};

/// Previews shorter than this (after trimming) are not worth a model call.
pub const MIN_CONTENT_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NoteOutcome {
    Processed {
        summary_id: i64,
        model_used: String,
        summary_preview: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteResult {
    pub technical_note_id: i64,
    #[serde(flatten)]
    pub outcome: NoteOutcome,
    pub processing_time: f64,
}

impl NoteResult {
    pub fn is_processed(&self) -> bool {
        matches!(self.outcome, NoteOutcome::Processed { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub processing_time: f64,
    pub results: Vec<NoteResult>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub status_counts: BTreeMap<String, i64>,
    pub total_summaries: i64,
    pub model_usage: BTreeMap<String, i64>,
    pub pending_count: i64,
    pub processed_count: i64,
    pub error_count: i64,
}

#[derive(Clone)]
pub struct Processor {
    pool: SqlitePool,
    summarizer: DynSummarizer,
}

impl Processor {
    pub fn new(pool: SqlitePool, summarizer: DynSummarizer) -> Self {
        Self { pool, summarizer }
    }

    pub fn model_name(&self) -> &str {
        self.summarizer.model_name()
    }

    pub async fn get_pending_notes(&self, limit: Option<i64>) -> Result<Vec<TechnicalNote>> {
        TechnicalNote::find_pending(&self.pool, None, limit).await
    }

    /// Summarize one note. Failures are recorded on the note and in the
    /// result; this never returns an error.
    pub async fn process_technical_note(&self, note: &TechnicalNote) -> NoteResult {
        let t0 = Instant::now();
        let outcome = self.process_inner(note, t0).await;
        let processing_time = t0.elapsed().as_secs_f64();

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                self.record_failure(note.id, &e, processing_time).await;
                NoteOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        NoteResult {
            technical_note_id: note.id,
            outcome,
            processing_time,
        }
    }

    async fn process_inner(&self, note: &TechnicalNote, t0: Instant) -> Result<NoteOutcome> {
        if ProcessedSummary::exists_for_note(&self.pool, note.id).await? {
            // Repair a status update lost after the summary was stored.
            if note.status != NoteStatus::Processed {
                TechnicalNote::set_status(&self.pool, note.id, NoteStatus::Processed).await?;
            }
            return Ok(NoteOutcome::Skipped {
                reason: "already processed".into(),
            });
        }
        if !TechnicalNote::claim(&self.pool, note.id).await? {
            return Ok(NoteOutcome::Skipped {
                reason: "not pending".into(),
            });
        }
        info!(note_id = note.id, title = %note.title, "processing technical note");

        let content = note.content_preview.trim();
        if content.chars().count() < MIN_CONTENT_CHARS {
            return Err(DigestError::Validation(format!(
                "insufficient content for processing ({} chars)",
                content.chars().count()
            )));
        }

        let t_model = Instant::now();
        let outcome = self.summarizer.summarize(content).await?;
        histogram!("summarize_ms").record(t_model.elapsed().as_secs_f64() * 1_000.0);

        let summary = ProcessedSummary::create(
            &self.pool,
            &NewSummary {
                technical_note_id: note.id,
                summary: outcome.payload.summary.clone(),
                key_points: outcome.payload.key_points.clone(),
                changes_identified: outcome.payload.changes_identified.clone(),
                topics: outcome.payload.topics.clone(),
                model_used: outcome.model.clone(),
                processing_time: Some(t0.elapsed().as_secs_f64()),
                tokens_used: outcome.tokens_used,
                confidence_score: outcome.payload.confidence_score,
            },
        )
        .await?;
        TechnicalNote::set_status(&self.pool, note.id, NoteStatus::Processed).await?;
        counter!("summaries_created_total").increment(1);

        let elapsed = t0.elapsed().as_secs_f64();
        ProcessingLog::create(
            &self.pool,
            &NewProcessingLog::new(
                note.id,
                Operation::Processing,
                LogLevel::Info,
                "summary generated",
            )
            .details(serde_json::json!({
                "summary_id": summary.id,
                "model": summary.model_used,
                "tokens_used": summary.tokens_used,
            }))
            .took(elapsed),
        )
        .await?;
        info!(note_id = note.id, secs = elapsed, "technical note processed");

        let preview: String = summary.summary.chars().take(200).collect();
        Ok(NoteOutcome::Processed {
            summary_id: summary.id,
            model_used: summary.model_used,
            summary_preview: preview,
        })
    }

    async fn record_failure(&self, note_id: i64, err: &DigestError, secs: f64) {
        error!(note_id, error = %err, "processing failed");
        counter!("summarize_errors_total").increment(1);
        if let Err(e) = TechnicalNote::set_status(&self.pool, note_id, NoteStatus::Error).await {
            warn!(note_id, error = %e, "could not mark note as error");
        }
        let log = NewProcessingLog::new(
            note_id,
            Operation::Processing,
            LogLevel::Error,
            err.to_string(),
        )
        .took(secs);
        if let Err(e) = ProcessingLog::create(&self.pool, &log).await {
            warn!(note_id, error = %e, "could not write processing log");
        }
    }

    pub async fn process_batch(&self, notes: &[TechnicalNote]) -> BatchStats {
        let t0 = Instant::now();
        let mut stats = BatchStats {
            total: notes.len(),
            ..BatchStats::default()
        };
        info!(total = notes.len(), "batch processing started");

        for note in notes {
            let result = self.process_technical_note(note).await;
            match result.outcome {
                NoteOutcome::Processed { .. } => stats.processed += 1,
                NoteOutcome::Skipped { .. } => stats.skipped += 1,
                NoteOutcome::Failed { .. } => stats.errors += 1,
            }
            stats.results.push(result);
        }

        stats.processing_time = t0.elapsed().as_secs_f64();
        info!(
            total = stats.total,
            processed = stats.processed,
            errors = stats.errors,
            skipped = stats.skipped,
            "batch processing finished"
        );
        stats
    }

    /// Load up to `limit` pending notes and process them.
    pub async fn process_pending(&self, limit: Option<i64>) -> Result<BatchStats> {
        let notes = self.get_pending_notes(limit).await?;
        Ok(self.process_batch(&notes).await)
    }

    pub async fn processing_stats(&self) -> Result<ProcessingStats> {
        processing_stats(&self.pool).await
    }

    /// Ask the model for a business-impact reading of an already summarized note.
    /// The analysis is appended to the note's log, not stored as a row of its own.
    pub async fn analyze_impact(&self, note_id: i64) -> Result<ImpactAnalysis> {
        let note = TechnicalNote::find_by_id(&self.pool, note_id)
            .await?
            .ok_or_else(|| DigestError::NotFound(format!("technical note {note_id}")))?;
        let summary = ProcessedSummary::find_by_note(&self.pool, note_id)
            .await?
            .ok_or_else(|| {
                DigestError::Validation(format!("technical note {note_id} has no summary yet"))
            })?;

        let input = ImpactInput {
            title: note.title.clone(),
            summary: summary.summary.clone(),
            key_points: summary.key_points.0.clone(),
            changes_identified: summary.changes_identified.0.clone(),
        };
        let t0 = Instant::now();
        let analysis = self.summarizer.analyze_impact(&input).await?;

        ProcessingLog::create(
            &self.pool,
            &NewProcessingLog::new(
                note_id,
                Operation::Processing,
                LogLevel::Info,
                "impact analysis generated",
            )
            .details(serde_json::json!({ "analysis": &analysis, "summary_id": summary.id }))
            .took(t0.elapsed().as_secs_f64()),
        )
        .await?;
        Ok(analysis)
    }
}

/// Note counts by status plus summary counts by model.
pub async fn processing_stats(pool: &SqlitePool) -> Result<ProcessingStats> {
    let status_counts = TechnicalNote::count_by_status(pool, None).await?;
    let total_summaries = ProcessedSummary::count(pool).await?;
    let model_usage = ProcessedSummary::count_by_model(pool).await?;
    let get = |k: NoteStatus| status_counts.get(k.as_str()).copied().unwrap_or(0);
    Ok(ProcessingStats {
        pending_count: get(NoteStatus::Pending),
        processed_count: get(NoteStatus::Processed),
        error_count: get(NoteStatus::Error),
        status_counts,
        total_summaries,
        model_usage,
    })
}
