use crate::auth::Authenticator;
use crate::config::TapConfig;
use crate::core::client::ApiClient;
use crate::core::csv_report::{CsvReportExtractor, FileIndex};
use crate::core::paginator::OffsetPaginator;
use crate::core::source::{partitions, Partitioning, RecordSource, StreamDescriptor};
use crate::core::watermark::Watermark;
use crate::domain::model::Partition;
use crate::domain::ports::{Clock, RecordSink, SystemClock};
use crate::utils::error::{Result, TapError};
use chrono::Datelike;
use serde_json::Value;
use std::sync::Arc;

const UNPARTITIONED: &str = "unpartitioned";

/// Per-stream counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub stream: String,
    pub partitions: usize,
    pub pages: usize,
    pub records: u64,
    /// Report rows dropped by the `start_date` watermark.
    pub filtered: u64,
}

impl StreamSummary {
    fn new(stream: &str) -> Self {
        Self {
            stream: stream.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub streams: Vec<StreamSummary>,
}

impl SyncSummary {
    pub fn total_records(&self) -> u64 {
        self.streams.iter().map(|s| s.records).sum()
    }

    pub fn stream(&self, name: &str) -> Option<&StreamSummary> {
        self.streams.iter().find(|s| s.stream == name)
    }
}

/// Runs streams one after another: partitions in order, pages in order, one request at a time.
pub struct ExtractionDriver<S: RecordSink> {
    client: ApiClient,
    auth: Authenticator,
    sink: S,
    page_size: Option<u32>,
    watermark: Watermark,
    clock: Arc<dyn Clock>,
}

impl<S: RecordSink> ExtractionDriver<S> {
    pub fn new(config: &TapConfig, sink: S) -> Result<Self> {
        let http = config.http_client()?;

        Ok(Self {
            client: ApiClient::new(http.clone(), config.api_url()),
            auth: Authenticator::new(http, config),
            sink,
            page_size: config.limit,
            watermark: Watermark::new(config.start_instant()?),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.auth = self.auth.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Extracts every given stream. The first failure aborts the run.
    pub async fn run(&mut self, streams: &[&'static StreamDescriptor]) -> Result<SyncSummary> {
        // 每次執行都重新取得 token 與 podcast 清單
        self.auth.reset().await;

        let mut summary = SyncSummary::default();
        for descriptor in streams {
            tracing::info!("Syncing stream {}", descriptor.name);
            let stream_summary = self.sync_stream(descriptor).await?;

            tracing::info!(
                "Stream {} done: {} record(s), {} filtered, {} partition(s), {} page(s)",
                stream_summary.stream,
                stream_summary.records,
                stream_summary.filtered,
                stream_summary.partitions,
                stream_summary.pages
            );
            summary.streams.push(stream_summary);
        }

        self.sink.finish().await?;
        tracing::info!("Sync finished: {} record(s) total", summary.total_records());
        Ok(summary)
    }

    async fn sync_stream(&mut self, descriptor: &'static StreamDescriptor) -> Result<StreamSummary> {
        let mut summary = StreamSummary::new(descriptor.name);
        self.sink
            .begin_stream(descriptor.name, &descriptor.key_properties())
            .await?;

        if descriptor.partitioning == Partitioning::None {
            summary.partitions = 1;
            self.sync_partition(descriptor, None, &mut summary)
                .await
                .map_err(|e| e.in_partition(descriptor.name, UNPARTITIONED))?;
            return Ok(summary);
        }

        let tenant_ids = self.auth.tenant_ids().await?;
        let start_year = self.watermark.start().year();
        let current_year = self.clock.now().year();
        let plan = partitions(descriptor, &tenant_ids, start_year, current_year);

        tracing::debug!(
            "{}: {} partition(s) across {} podcast(s)",
            descriptor.name,
            plan.len(),
            tenant_ids.len()
        );

        for partition in &plan {
            summary.partitions += 1;
            self.sync_partition(descriptor, Some(partition), &mut summary)
                .await
                .map_err(|e| e.in_partition(descriptor.name, partition.to_string()))?;
        }

        Ok(summary)
    }

    async fn sync_partition(
        &mut self,
        descriptor: &'static StreamDescriptor,
        partition: Option<&Partition>,
        summary: &mut StreamSummary,
    ) -> Result<()> {
        let source = RecordSource::new(descriptor);
        let mut paginator = OffsetPaginator::new(self.page_size);
        let mut cursor = paginator.cursor();
        let mut file_index = FileIndex::default();

        loop {
            // token 可能在分頁之間過期，每頁都重新取
            let token = self
                .auth
                .get_token(partition.map(|p| p.podcast_id.as_str()))
                .await?;
            let params = source.build_params(partition, Some(&cursor), &token);
            let body = self.client.get_json(descriptor.path, &params).await?;
            summary.pages += 1;

            let items = if descriptor.is_csv_report() {
                self.emit_reports(descriptor, &body, partition, &mut file_index, summary)
                    .await?
            } else {
                self.emit_page(&source, &body, partition, summary).await?
            };

            if !descriptor.paginated {
                break;
            }
            if items == 0 {
                paginator.finish();
                break;
            }
            match paginator.next_cursor(&body) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        Ok(())
    }

    /// Returns the number of raw records on the page.
    async fn emit_page(
        &mut self,
        source: &RecordSource<'_>,
        body: &Value,
        partition: Option<&Partition>,
        summary: &mut StreamSummary,
    ) -> Result<usize> {
        let raw_records = source.parse(body)?;
        let count = raw_records.len();
        let stream = source.descriptor().name;

        for raw in raw_records {
            if let Some(record) = source.post_process(raw, partition) {
                self.sink.write_record(stream, &record).await?;
                summary.records += 1;
            }
        }

        Ok(count)
    }

    /// Returns the number of CSV files the envelope pointed at.
    async fn emit_reports(
        &mut self,
        descriptor: &StreamDescriptor,
        body: &Value,
        partition: Option<&Partition>,
        file_index: &mut FileIndex,
        summary: &mut StreamSummary,
    ) -> Result<usize> {
        let partition = partition.ok_or_else(|| TapError::ConfigError {
            message: format!("report stream {} needs a podcast partition", descriptor.name),
        })?;

        let extractor = CsvReportExtractor::new(descriptor, self.watermark);
        let mut files = extractor.discover_urls(body)?;
        file_index.assign(&mut files);
        tracing::debug!("{} {}: {} report file(s)", descriptor.name, partition, files.len());

        for file in &files {
            let mut rows = extractor.stream_rows(&self.client, file).await?;
            while let Some(row) = rows.next_row().await? {
                match extractor.post_process(row, file, partition)? {
                    Some(record) => {
                        self.sink.write_record(descriptor.name, &record).await?;
                        summary.records += 1;
                    }
                    None => summary.filtered += 1,
                }
            }
        }

        Ok(files.len())
    }
}
