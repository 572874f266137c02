use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::auth::ApiKeyBinding;
use crate::logging::{ApiFormat, LogSink, LogStatus, ProxyLogEntry};

pub const DISCONNECTED: &str = "client disconnected";
const TRUNCATED_MARKER: &str = "...[truncated]";

fn truncate_content(content: &mut String, max_chars: usize) {
    if max_chars == 0 {
        return;
    }
    if let Some((cut, _)) = content.char_indices().nth(max_chars) {
        content.truncate(cut);
        content.push_str(TRUNCATED_MARKER);
    }
}

/// Log entry of one in-flight request.
///
/// Created when a request reaches a protocol handler and appended to the sink exactly once:
/// explicitly through [`PendingLog::succeed`] / [`PendingLog::fail`], or from `Drop` with
/// status `error` when the request future is abandoned (client went away).
pub struct PendingLog {
    sink: Arc<dyn LogSink>,
    entry: Option<ProxyLogEntry>,
    started: Instant,
    max_content_chars: usize,
}

impl PendingLog {
    pub fn start(
        sink: Arc<dyn LogSink>,
        format: ApiFormat,
        binding: &ApiKeyBinding,
        max_content_chars: usize,
    ) -> Self {
        let entry = ProxyLogEntry {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            format,
            model: binding.model_id.clone(),
            binding_id: binding.id.clone(),
            binding_label: binding.label.clone(),
            status: LogStatus::Success,
            error: None,
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            input_content: String::new(),
            output_content: String::new(),
        };
        Self {
            sink,
            entry: Some(entry),
            started: Instant::now(),
            max_content_chars,
        }
    }

    pub fn request_id(&self) -> &str {
        self.entry.as_ref().map_or("", |e| e.request_id.as_str())
    }

    pub fn set_model(&mut self, model_id: &str) {
        if let Some(e) = self.entry.as_mut() {
            e.model = model_id.to_string();
        }
    }

    pub fn set_input(&mut self, content: &str, tokens: u32) {
        if let Some(e) = self.entry.as_mut() {
            e.input_content = content.to_string();
            e.input_tokens = tokens;
        }
    }

    /// Output so far. Replaced on every call so an abandoned request logs its latest state.
    pub fn set_output(&mut self, content: &str, tokens: u32) {
        if let Some(e) = self.entry.as_mut() {
            e.output_content = content.to_string();
            e.output_tokens = tokens;
        }
    }

    pub fn push_output(&mut self, fragment: &str) {
        if let Some(e) = self.entry.as_mut() {
            e.output_content.push_str(fragment);
        }
    }

    pub async fn succeed(self) {
        self.finish(LogStatus::Success, None).await;
    }

    pub async fn fail(self, error: impl Into<String>) {
        self.finish(LogStatus::Error, Some(error.into())).await;
    }

    async fn finish(mut self, status: LogStatus, error: Option<String>) {
        let Some(entry) = self.seal(status, error) else {
            return;
        };
        append_logged(self.sink.as_ref(), entry).await;
    }

    fn seal(&mut self, status: LogStatus, error: Option<String>) -> Option<ProxyLogEntry> {
        let mut entry = self.entry.take()?;
        entry.status = status;
        entry.error = error;
        entry.duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        truncate_content(&mut entry.input_content, self.max_content_chars);
        truncate_content(&mut entry.output_content, self.max_content_chars);
        Some(entry)
    }
}

impl Drop for PendingLog {
    fn drop(&mut self) {
        let Some(entry) = self.seal(LogStatus::Error, Some(DISCONNECTED.to_string())) else {
            return;
        };
        let sink = self.sink.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    append_logged(sink.as_ref(), entry).await;
                });
            }
            Err(_) => {
                tracing::error!(request_id = %entry.request_id, "No runtime to record abandoned request");
            }
        }
    }
}

// 日志写入失败只记录诊断信息，不影响请求
async fn append_logged(sink: &dyn LogSink, entry: ProxyLogEntry) {
    let request_id = entry.request_id.clone();
    let status = entry.status;
    match sink.append(entry).await {
        Ok(()) => tracing::debug!(request_id = %request_id, ?status, "Request logged"),
        Err(e) => tracing::error!(request_id = %request_id, "Failed to log request: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryLogSink, TEST_MODEL, test_binding};

    fn pending(sink: &Arc<MemoryLogSink>, max: usize) -> PendingLog {
        PendingLog::start(sink.clone(), ApiFormat::OpenAi, &test_binding(TEST_MODEL), max)
    }

    #[test]
    fn truncation_is_char_based_and_marked() {
        let mut s = "héllo wörld".to_string();
        truncate_content(&mut s, 5);
        assert_eq!(s, "héllo...[truncated]");
        let mut short = "abc".to_string();
        truncate_content(&mut short, 3);
        assert_eq!(short, "abc");
    }

    #[tokio::test]
    async fn success_is_logged_once_with_binding_fields() {
        let sink = Arc::new(MemoryLogSink::default());
        let mut log = pending(&sink, 100);
        log.set_input("hi", 1);
        log.set_output("hello", 2);
        log.succeed().await;

        let entries = sink.wait_for(1).await;
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.status, LogStatus::Success);
        assert_eq!(e.binding_label, "dev laptop");
        assert_eq!(e.model, TEST_MODEL);
        assert_eq!((e.input_tokens, e.output_tokens), (1, 2));
        assert!(e.error.is_none());
    }

    #[tokio::test]
    async fn dropped_guard_logs_disconnect_with_partial_output() {
        let sink = Arc::new(MemoryLogSink::default());
        {
            let mut log = pending(&sink, 100);
            log.push_output("par");
            log.push_output("tial");
        }
        let entries = sink.wait_for(1).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LogStatus::Error);
        assert_eq!(entries[0].error.as_deref(), Some(DISCONNECTED));
        assert_eq!(entries[0].output_content, "partial");
    }

    #[tokio::test]
    async fn fail_does_not_double_log_on_drop() {
        let sink = Arc::new(MemoryLogSink::default());
        pending(&sink, 100).fail("boom").await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error.as_deref(), Some("boom"));
    }
}
