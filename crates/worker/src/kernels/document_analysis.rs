//! Keyword-occurrence scan over an in-memory document (the
//! `DOCUMENT_ANALYSIS` kernel). Splits the text into randomized 50–300
//! line chunks, scans each with a combined case-insensitive keyword
//! regex, and streams a `{keyword, snippet, chunk_index, line}` record per
//! match via `result_chunk` as it goes, with a final summary as the task
//! result. `TaskPayload::DocumentAnalysis` carries the document as an
//! inline `text: String` rather than a path or URL, so there is no
//! download/open step — chunking runs directly over the in-memory string.

use rand::Rng;
use regex::RegexBuilder;
use reporter::Reporter;
use serde_json::json;
use std::collections::HashMap;
use task_types::{CoreError, Progress, TaskState, TaskStatus};

const MIN_LINES_PER_CHUNK: usize = 50;
const MAX_LINES_PER_CHUNK: usize = 300;
const SNIPPET_RADIUS: usize = 30;
const CHUNK_BATCH_SIZE: usize = 20;

pub async fn run(
    text: &str,
    keywords: &[String],
    reporter: &Reporter,
) -> Result<(), CoreError> {
    if keywords.is_empty() {
        return Err(CoreError::Fatal("document_analysis requires at least one keyword".to_string()));
    }
    let pattern = RegexBuilder::new(
        &keywords.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|"),
    )
    .case_insensitive(true)
    .build()
    .map_err(|e| CoreError::Fatal(format!("invalid keyword pattern: {e}")))?;

    let total_bytes = text.len() as i64;
    reporter
        .report_status(TaskStatus {
            state: TaskState::Running,
            progress: Progress { current: Some(0), total: Some(total_bytes), ..Default::default() },
            message: Some("scanning".to_string()),
            metrics: Default::default(),
        })
        .await?;

    let mut emitter = reporter.result_chunk(CHUNK_BATCH_SIZE)?;
    let mut keyword_counts: HashMap<String, u64> = HashMap::new();
    let mut total_matches: u64 = 0;
    let mut bytes_read: i64 = 0;
    let mut line_number: usize = 1;
    let mut chunk_index: usize = 0;

    for (chunk_text, chunk_lines) in chunk_by_lines(text) {
        let line_offsets = line_offsets(&chunk_text);
        for m in pattern.find_iter(&chunk_text) {
            let snippet_start = m.start().saturating_sub(SNIPPET_RADIUS);
            let snippet_end = (m.end() + SNIPPET_RADIUS).min(chunk_text.len());
            let snippet = safe_slice(&chunk_text, snippet_start, snippet_end);
            let line_offset = line_offsets.partition_point(|&o| o <= m.start()).saturating_sub(1);
            let snippet_line = line_number + line_offset;

            let keyword = m.as_str().to_string();
            *keyword_counts.entry(keyword.to_lowercase()).or_insert(0) += 1;
            total_matches += 1;

            emitter
                .emit(json!({
                    "keyword": keyword,
                    "snippet": snippet,
                    "chunk_index": chunk_index,
                    "line": snippet_line,
                }))
                .await?;
        }

        bytes_read += chunk_text.len() as i64;
        line_number += chunk_lines;
        chunk_index += 1;

        let percentage = (bytes_read as f64 / total_bytes.max(1) as f64).min(1.0);
        reporter
            .report_status(TaskStatus {
                state: TaskState::Running,
                progress: Progress {
                    current: Some(bytes_read),
                    total: Some(total_bytes),
                    percentage: Some(percentage),
                    phase: None,
                },
                message: None,
                metrics: [("snippets_emitted".to_string(), json!(total_matches))].into_iter().collect(),
            })
            .await?;
    }
    emitter.finish().await?;

    reporter
        .report_status(TaskStatus {
            state: TaskState::Completed,
            progress: Progress {
                current: Some(total_bytes),
                total: Some(total_bytes),
                percentage: Some(1.0),
                phase: None,
            },
            message: None,
            metrics: Default::default(),
        })
        .await?;
    reporter
        .report_result(json!({
            "total_matches": total_matches,
            "keyword_counts": keyword_counts,
        }))
        .await?;
    Ok(())
}

/// Splits `text` into randomly sized chunks of
/// `MIN_LINES_PER_CHUNK..=MAX_LINES_PER_CHUNK` lines each.
fn chunk_by_lines(text: &str) -> Vec<(String, usize)> {
    let mut chunks = Vec::new();
    let mut lines = text.split_inclusive('\n').peekable();
    while lines.peek().is_some() {
        let take = rand::rng().random_range(MIN_LINES_PER_CHUNK..=MAX_LINES_PER_CHUNK);
        let mut buf = String::new();
        let mut count = 0;
        for _ in 0..take {
            match lines.next() {
                Some(line) => {
                    buf.push_str(line);
                    count += 1;
                }
                None => break,
            }
        }
        if count == 0 {
            break;
        }
        chunks.push((buf, count));
    }
    chunks
}

fn line_offsets(chunk_text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    let mut acc = 0;
    for line in chunk_text.split_inclusive('\n') {
        acc += line.len();
        offsets.push(acc);
    }
    offsets
}

fn safe_slice(s: &str, start: usize, end: usize) -> String {
    let start = floor_char_boundary(s, start);
    let end = floor_char_boundary(s, end.min(s.len()));
    s[start..end].to_string()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::{EventLog, InMemoryEventLog};
    use std::sync::Arc;
    use task_pipeline::AsyncPublisher;
    use task_types::TaskId;

    async fn reporter() -> Reporter {
        let log = Arc::new(InMemoryEventLog::new());
        log.ensure_group("task_events", "g", "0").await.unwrap();
        Reporter::new(AsyncPublisher::new(log, "task_events"), TaskId::new())
    }

    #[tokio::test]
    async fn finds_case_insensitive_matches() {
        let reporter = reporter().await;
        let text = "the quick Brown fox\njumps over the lazy dog\n";
        let keywords = vec!["brown".to_string(), "dog".to_string()];
        run(text, &keywords, &reporter).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_empty_keyword_list() {
        let reporter = reporter().await;
        let err = run("some text", &[], &reporter).await.unwrap_err();
        assert!(matches!(err, CoreError::Fatal(_)));
    }

    #[test]
    fn chunking_covers_every_line() {
        let text = (0..500).map(|i| format!("line {i}\n")).collect::<String>();
        let chunks = chunk_by_lines(&text);
        let total_lines: usize = chunks.iter().map(|(_, n)| n).sum();
        assert_eq!(total_lines, 500);
    }
}
