use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::NaiveDate;

use super::time::{parse_partition_file_name, partition_date, partition_file_name};
use super::types::{LogStats, ProxyLogEntry};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// 请求日志存储抽象：追加写入 + 按日统计
pub trait LogSink: Send + Sync {
    fn append<'a>(&'a self, entry: ProxyLogEntry) -> BoxFuture<'a, io::Result<()>>;
    fn read_entries<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, io::Result<Vec<ProxyLogEntry>>>;

    fn stats<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, io::Result<LogStats>> {
        Box::pin(async move {
            let entries = self.read_entries(date).await?;
            Ok(LogStats::from_entries(&entries))
        })
    }
}

/// Append-only JSON-lines store, one file per UTC date.
#[derive(Debug, Clone)]
pub struct JsonlLogSink {
    dir: PathBuf,
}

impl JsonlLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            tracing::info!("Created log directory: {}", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(partition_file_name(date))
    }

    /// Available partitions, newest first.
    pub async fn list_dates(&self) -> io::Result<Vec<NaiveDate>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut dates: Vec<NaiveDate> = std::fs::read_dir(&dir)?
                .flatten()
                .filter_map(|e| parse_partition_file_name(&e.file_name().to_string_lossy()))
                .collect();
            dates.sort_unstable_by(|a, b| b.cmp(a));
            Ok(dates)
        })
        .await
        .map_err(io::Error::other)?
    }
}

fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    // 单次 write_all 写入整行，O_APPEND 保证并发追加不会交错
    file.write_all(line)
}

fn read_partition(path: &Path) -> io::Result<Vec<ProxyLogEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut entries = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProxyLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping unparsable log line in {}: {}", path.display(), e),
        }
    }
    Ok(entries)
}

impl LogSink for JsonlLogSink {
    fn append<'a>(&'a self, entry: ProxyLogEntry) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            let path = self.path_for(partition_date(&entry.timestamp));
            tokio::task::spawn_blocking(move || append_line(&path, &line))
                .await
                .map_err(io::Error::other)?
        })
    }

    fn read_entries<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, io::Result<Vec<ProxyLogEntry>>> {
        Box::pin(async move {
            let path = self.path_for(date);
            tokio::task::spawn_blocking(move || read_partition(&path))
                .await
                .map_err(io::Error::other)?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::types::{ApiFormat, LogStatus};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn entry(day: u32, status: LogStatus, duration_ms: u64) -> ProxyLogEntry {
        ProxyLogEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap(),
            request_id: uuid::Uuid::new_v4().to_string(),
            format: ApiFormat::OpenAi,
            model: "m1".into(),
            binding_id: "b1".into(),
            binding_label: "dev".into(),
            status,
            error: match status {
                LogStatus::Success => None,
                LogStatus::Error => Some("boom".into()),
            },
            duration_ms,
            input_tokens: 10,
            output_tokens: 5,
            input_content: "[{\"role\":\"user\",\"content\":\"hi\"}]".into(),
            output_content: "hello\nworld".into(),
        }
    }

    #[tokio::test]
    async fn appends_are_partitioned_by_date() {
        let dir = tempdir().unwrap();
        let sink = JsonlLogSink::new(dir.path().join("logs")).unwrap();

        sink.append(entry(1, LogStatus::Success, 100)).await.unwrap();
        sink.append(entry(2, LogStatus::Error, 300)).await.unwrap();
        sink.append(entry(2, LogStatus::Success, 100)).await.unwrap();

        let day1 = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        assert_eq!(sink.read_entries(day1).await.unwrap().len(), 1);
        assert_eq!(sink.read_entries(day2).await.unwrap().len(), 2);
        assert_eq!(sink.list_dates().await.unwrap(), vec![day2, day1]);

        // multi-line content must stay on a single record line
        let raw = std::fs::read_to_string(sink.path_for(day1)).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn stats_roll_up_a_partition() {
        let dir = tempdir().unwrap();
        let sink = JsonlLogSink::new(dir.path()).unwrap();
        sink.append(entry(3, LogStatus::Success, 100)).await.unwrap();
        sink.append(entry(3, LogStatus::Error, 300)).await.unwrap();

        let stats = sink
            .stats(NaiveDate::from_ymd_opt(2026, 5, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 1);
        assert!((stats.average_duration_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_input_tokens, 20);
        assert_eq!(stats.total_output_tokens, 10);

        let empty = sink
            .stats(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap())
            .await
            .unwrap();
        assert_eq!(empty, LogStats::default());
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(JsonlLogSink::new(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let mut e = entry(9, LogStatus::Success, 1);
                e.output_content = "x".repeat(8 * 1024);
                sink.append(e).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entries = sink
            .read_entries(NaiveDate::from_ymd_opt(2026, 5, 9).unwrap())
            .await
            .unwrap();
        assert_eq!(entries.len(), 32);
    }

    #[tokio::test]
    async fn unparsable_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let sink = JsonlLogSink::new(dir.path()).unwrap();
        sink.append(entry(10, LogStatus::Success, 1)).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        append_line(&sink.path_for(day), b"{not json\n").unwrap();

        assert_eq!(sink.read_entries(day).await.unwrap().len(), 1);
    }
}
