//! Report streams: the API answers with a `download_urls` envelope whose keys
//! are `YYYY-M` periods and whose values are one URL or a list of URLs. Each
//! URL is a CSV export that is read incrementally, filtered against the
//! `start_date` watermark and keyed by `(podcast_id, file_key, record_key)`.

use crate::core::client::{transport_error, ApiClient};
use crate::core::source::{StreamDescriptor, PostProcess, REPORT_TIMESTAMP_COLUMN};
use crate::core::watermark::{parse_instant, Watermark};
use crate::domain::model::{Partition, Record};
use crate::utils::error::{Result, TapError};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use regex::Regex;
use reqwest::Response;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SPREADSHEET_ESCAPE: char = '\'';

fn period_pattern() -> &'static Regex {
    static PERIOD: OnceLock<Regex> = OnceLock::new();
    PERIOD.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})$").expect("static period pattern"))
}

/// `(year, month)` for a valid bucket key such as `2023-1` or `2023-11`.
pub fn parse_bucket_key(key: &str) -> Option<(i32, u32)> {
    let caps = period_pattern().captures(key)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// One CSV export discovered in a report envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub bucket_key: String,
    /// Position of the URL within its bucket, counted across the partition's pages.
    pub index: usize,
    pub url: String,
}

impl SourceFile {
    pub fn file_key(&self) -> String {
        format!("{}#{}", self.bucket_key, self.index)
    }
}

/// Keeps file keys unique when a partition's report envelopes span several
/// pages and a later page repeats a bucket key.
#[derive(Debug, Default)]
pub struct FileIndex {
    next: HashMap<String, usize>,
}

impl FileIndex {
    /// Shifts each file's index past the ones already handed out for its bucket.
    pub fn assign(&mut self, files: &mut [SourceFile]) {
        let mut page_next: HashMap<String, usize> = HashMap::new();
        for file in files.iter_mut() {
            file.index += self.next.get(&file.bucket_key).copied().unwrap_or(0);
            let next = page_next.entry(file.bucket_key.clone()).or_insert(0);
            *next = (*next).max(file.index + 1);
        }
        self.next.extend(page_next);
    }
}

/// A decoded data row; `ordinal` is 1-based over all data rows of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub ordinal: u64,
    pub fields: Vec<(String, String)>,
}

impl CsvRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Lookup ignoring case and whitespace, so `Time (GMT)` matches `Time(GMT)`.
    pub fn get_loose(&self, column: &str) -> Option<&str> {
        let wanted = normalize_header(column);
        self.fields
            .iter()
            .find(|(name, _)| normalize_header(name) == wanted)
            .map(|(_, value)| value.as_str())
    }
}

fn normalize_header(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

type DecodeResult = std::result::Result<(), csv::FromUtf8Error>;

/// Incremental CSV decoder over `csv_core`. Chunks may split records, quoted
/// fields or the BOM anywhere; only the current partial record is buffered.
#[derive(Debug)]
pub struct RowDecoder {
    reader: csv_core::Reader,
    lead: Vec<u8>,
    bom_checked: bool,
    fields: Vec<u8>,
    fields_len: usize,
    ends: Vec<usize>,
    ends_len: usize,
    pending: VecDeque<StringRecord>,
    headers: Option<Vec<String>>,
    ordinal: u64,
}

impl Default for RowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RowDecoder {
    pub fn new() -> Self {
        Self {
            reader: csv_core::Reader::new(),
            lead: Vec::with_capacity(UTF8_BOM.len()),
            bom_checked: false,
            fields: vec![0; 1024],
            fields_len: 0,
            ends: vec![0; 32],
            ends_len: 0,
            pending: VecDeque::new(),
            headers: None,
            ordinal: 0,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> DecodeResult {
        // 空輸入對 csv_core 代表檔案結束
        if chunk.is_empty() {
            return Ok(());
        }
        if self.bom_checked {
            return self.parse(chunk);
        }

        self.lead.extend_from_slice(chunk);
        if self.lead.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&self.lead) {
            return Ok(());
        }
        self.release_lead()
    }

    /// Signals end of input; decodes a final record without a trailing newline.
    pub fn finish(&mut self) -> DecodeResult {
        if !self.bom_checked {
            self.release_lead()?;
        }
        self.parse(&[])
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn next_row(&mut self) -> Option<CsvRow> {
        while let Some(record) = self.pending.pop_front() {
            let Some(headers) = &self.headers else {
                self.headers = Some(record.iter().map(|h| h.trim().to_string()).collect());
                continue;
            };

            self.ordinal += 1;
            let fields = headers
                .iter()
                .zip(record.iter())
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect();

            return Some(CsvRow {
                ordinal: self.ordinal,
                fields,
            });
        }
        None
    }

    /// Drops a leading BOM and hands the bytes held back for it to the parser.
    fn release_lead(&mut self) -> DecodeResult {
        self.bom_checked = true;
        let lead = std::mem::take(&mut self.lead);
        let body = lead.strip_prefix(UTF8_BOM).unwrap_or(&lead);

        if body.is_empty() {
            Ok(())
        } else {
            self.parse(body)
        }
    }

    fn parse(&mut self, mut input: &[u8]) -> DecodeResult {
        use csv_core::ReadRecordResult;

        loop {
            let (result, read, written, ended) = self.reader.read_record(
                input,
                &mut self.fields[self.fields_len..],
                &mut self.ends[self.ends_len..],
            );
            input = &input[read..];
            self.fields_len += written;
            self.ends_len += ended;

            match result {
                ReadRecordResult::InputEmpty | ReadRecordResult::End => return Ok(()),
                ReadRecordResult::OutputFull => {
                    let len = self.fields.len();
                    self.fields.resize(len * 2, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let len = self.ends.len();
                    self.ends.resize(len * 2, 0);
                }
                ReadRecordResult::Record => self.complete_record()?,
            }
        }
    }

    fn complete_record(&mut self) -> DecodeResult {
        let mut record = csv::ByteRecord::with_capacity(self.fields_len, self.ends_len);
        let mut start = 0;
        for &end in &self.ends[..self.ends_len] {
            record.push_field(&self.fields[start..end]);
            start = end;
        }
        self.fields_len = 0;
        self.ends_len = 0;

        self.pending.push_back(StringRecord::from_byte_record(record)?);
        Ok(())
    }
}

/// Lazy, single-pass rows of one downloaded CSV file.
pub struct CsvRowStream {
    response: Response,
    url: String,
    decoder: RowDecoder,
    exhausted: bool,
}

impl CsvRowStream {
    pub fn new(response: Response, url: impl Into<String>) -> Self {
        Self {
            response,
            url: url.into(),
            decoder: RowDecoder::new(),
            exhausted: false,
        }
    }

    pub async fn next_row(&mut self) -> Result<Option<CsvRow>> {
        loop {
            if let Some(row) = self.decoder.next_row() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }

            let chunk = self
                .response
                .chunk()
                .await
                .map_err(|e| transport_error(&self.url, e))?;

            let decoded = match chunk {
                Some(bytes) => self.decoder.feed(&bytes),
                None => {
                    self.exhausted = true;
                    self.decoder.finish()
                }
            };
            decoded.map_err(|e| TapError::malformed(&self.url, format!("CSV decode error: {}", e)))?;
        }
    }
}

/// Discovery, download and shaping for one report stream.
#[derive(Debug, Clone)]
pub struct CsvReportExtractor {
    endpoint: &'static str,
    key_properties: &'static [&'static str],
    timestamp_column: &'static str,
    watermark: Watermark,
}

impl CsvReportExtractor {
    pub fn new(descriptor: &StreamDescriptor, watermark: Watermark) -> Self {
        let timestamp_column = match descriptor.post_process {
            PostProcess::CsvReport { timestamp_column } => timestamp_column,
            _ => REPORT_TIMESTAMP_COLUMN,
        };

        Self {
            endpoint: descriptor.path,
            key_properties: descriptor.key_properties,
            timestamp_column,
            watermark,
        }
    }

    /// CSV files listed in a report envelope, oldest period first.
    pub fn discover_urls(&self, response_body: &Value) -> Result<Vec<SourceFile>> {
        let buckets = match response_body.get("download_urls") {
            Some(Value::Object(buckets)) => buckets,
            // PHP 的空 map 會序列化成 []
            Some(Value::Array(items)) if items.is_empty() => return Ok(Vec::new()),
            Some(Value::Null) => return Ok(Vec::new()),
            Some(other) => {
                return Err(TapError::malformed(
                    self.endpoint,
                    format!("download_urls is not an object: {}", other),
                ))
            }
            None => {
                return Err(TapError::malformed(
                    self.endpoint,
                    "missing 'download_urls' in report envelope",
                ))
            }
        };

        let mut periods: Vec<((i32, u32), &String, &Value)> = Vec::new();
        for (key, value) in buckets {
            match parse_bucket_key(key) {
                Some(period) => periods.push((period, key, value)),
                None => tracing::warn!("{}: skipping non-period key '{}'", self.endpoint, key),
            }
        }
        periods.sort_by_key(|(period, _, _)| *period);

        let mut files = Vec::new();
        for (_, bucket_key, value) in periods {
            let urls: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                scalar => vec![scalar],
            };

            for (index, url) in urls.into_iter().enumerate() {
                match url.as_str().map(str::trim) {
                    Some(url) if is_http_url(url) => files.push(SourceFile {
                        bucket_key: bucket_key.clone(),
                        index,
                        url: url.to_string(),
                    }),
                    Some("") => {}
                    _ => tracing::warn!(
                        "{}: discarding unusable download URL for {}: {}",
                        self.endpoint,
                        bucket_key,
                        url
                    ),
                }
            }
        }

        Ok(files)
    }

    pub async fn stream_rows(&self, client: &ApiClient, file: &SourceFile) -> Result<CsvRowStream> {
        let response = client.get_stream(&file.url).await?;
        Ok(CsvRowStream::new(response, file.url.clone()))
    }

    /// Timestamp of a row, with the spreadsheet escape quote removed.
    pub fn row_timestamp(&self, row: &CsvRow, file: &SourceFile) -> Result<DateTime<Utc>> {
        let raw = row.get_loose(self.timestamp_column).ok_or_else(|| {
            TapError::malformed(
                &file.url,
                format!(
                    "row {} has no '{}' column",
                    row.ordinal, self.timestamp_column
                ),
            )
        })?;

        let cleaned = raw.trim().trim_start_matches(SPREADSHEET_ESCAPE);
        parse_instant(cleaned).ok_or_else(|| {
            TapError::malformed(
                &file.url,
                format!(
                    "row {} has an unparsable '{}' value: {:?}",
                    row.ordinal, self.timestamp_column, raw
                ),
            )
        })
    }

    /// Output record for a row, or `None` when the row predates the watermark.
    pub fn post_process(
        &self,
        row: CsvRow,
        file: &SourceFile,
        partition: &Partition,
    ) -> Result<Option<Record>> {
        let timestamp = self.row_timestamp(&row, file)?;
        if !self.watermark.admits(timestamp) {
            return Ok(None);
        }

        let mut data = Map::with_capacity(row.fields.len() + 3);
        data.insert(
            "podcast_id".to_string(),
            Value::String(partition.podcast_id.clone()),
        );
        data.insert("file_key".to_string(), Value::String(file.file_key()));
        data.insert("record_key".to_string(), Value::from(row.ordinal));
        for (name, value) in row.fields {
            data.entry(name).or_insert(Value::String(value));
        }

        Ok(Some(Record::new(self.key_properties, data)))
    }
}

fn is_http_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::find_stream;
    use httpmock::prelude::*;
    use serde_json::json;

    fn extractor(start: &str) -> CsvReportExtractor {
        CsvReportExtractor::new(
            find_stream("podcast_download_reports").unwrap(),
            Watermark::new(parse_instant(start).unwrap()),
        )
    }

    fn file(bucket: &str, index: usize) -> SourceFile {
        SourceFile {
            bucket_key: bucket.to_string(),
            index,
            url: format!("https://x/{}-{}.csv", bucket, index),
        }
    }

    fn row(ordinal: u64, time: &str) -> CsvRow {
        CsvRow {
            ordinal,
            fields: vec![
                ("Time(GMT)".to_string(), time.to_string()),
                ("Episode".to_string(), "Pilot".to_string()),
            ],
        }
    }

    fn decode_all(chunks: &[&[u8]]) -> (Option<Vec<String>>, Vec<CsvRow>) {
        let mut decoder = RowDecoder::new();
        let mut rows = Vec::new();
        for chunk in chunks {
            decoder.feed(chunk).unwrap();
            while let Some(row) = decoder.next_row() {
                rows.push(row);
            }
        }
        decoder.finish().unwrap();
        while let Some(row) = decoder.next_row() {
            rows.push(row);
        }
        (decoder.headers().map(|h| h.to_vec()), rows)
    }

    #[test]
    fn test_bucket_key_pattern() {
        assert_eq!(parse_bucket_key("2023-1"), Some((2023, 1)));
        assert_eq!(parse_bucket_key("2023-12"), Some((2023, 12)));
        assert_eq!(parse_bucket_key("2023-13"), None);
        assert_eq!(parse_bucket_key("2023-0"), None);
        assert_eq!(parse_bucket_key("23-1"), None);
        assert_eq!(parse_bucket_key("2023-001"), None);
        assert_eq!(parse_bucket_key("invalid-key"), None);
    }

    #[test]
    fn test_discover_urls_normalizes_scalars_and_lists() {
        let body = json!({
            "download_urls": {
                "2023-1": "https://x/a.csv",
                "2023-2": ["https://x/b.csv", "https://x/c.csv"],
                "invalid-key": "https://x/d.csv"
            }
        });

        let files = extractor("2023-01-01").discover_urls(&body).unwrap();
        let urls: Vec<_> = files.iter().map(|f| f.url.as_str()).collect();

        assert_eq!(urls, vec!["https://x/a.csv", "https://x/b.csv", "https://x/c.csv"]);
        assert_eq!(files[0].file_key(), "2023-1#0");
        assert_eq!(files[2].file_key(), "2023-2#1");
    }

    #[test]
    fn test_discover_urls_orders_periods_chronologically() {
        let body = json!({
            "download_urls": {
                "2023-10": "https://x/oct.csv",
                "2023-2": "https://x/feb.csv",
                "2022-12": "https://x/dec.csv"
            }
        });

        let files = extractor("2022-01-01").discover_urls(&body).unwrap();
        let buckets: Vec<_> = files.iter().map(|f| f.bucket_key.as_str()).collect();
        assert_eq!(buckets, vec!["2022-12", "2023-2", "2023-10"]);
    }

    #[test]
    fn test_discover_urls_discards_empty_and_non_http_values() {
        let body = json!({
            "download_urls": {
                "2023-1": "",
                "2023-2": [],
                "2023-3": ["ftp://x/a.csv", "not a url", 7, "http://x/ok.csv"],
                "2023-4": null
            }
        });

        let files = extractor("2023-01-01").discover_urls(&body).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, "http://x/ok.csv");
        assert_eq!(files[0].file_key(), "2023-3#3");
    }

    #[test]
    fn test_discover_urls_envelope_shapes() {
        let ex = extractor("2023-01-01");
        assert!(ex.discover_urls(&json!({"download_urls": []})).unwrap().is_empty());
        assert!(ex.discover_urls(&json!({"download_urls": null})).unwrap().is_empty());
        assert!(matches!(
            ex.discover_urls(&json!({"error": "x"})),
            Err(TapError::MalformedResponse { .. })
        ));
        assert!(ex.discover_urls(&json!({"download_urls": "https://x/a.csv"})).is_err());
    }

    #[test]
    fn test_file_index_continues_buckets_across_pages() {
        let ex = extractor("2023-01-01");
        let mut index = FileIndex::default();

        let mut first = ex
            .discover_urls(&json!({"download_urls": {
                "2023-1": ["https://x/a.csv", "https://x/b.csv"],
                "2023-2": "https://x/c.csv"
            }}))
            .unwrap();
        index.assign(&mut first);

        let mut second = ex
            .discover_urls(&json!({"download_urls": {
                "2023-2": ["https://x/d.csv", "https://x/e.csv"],
                "2023-3": "https://x/f.csv"
            }}))
            .unwrap();
        index.assign(&mut second);

        let keys: Vec<_> = first.iter().chain(&second).map(SourceFile::file_key).collect();
        assert_eq!(
            keys,
            vec!["2023-1#0", "2023-1#1", "2023-2#0", "2023-2#1", "2023-2#2", "2023-3#0"]
        );
    }

    #[test]
    fn test_decoder_strips_bom_split_across_chunks() {
        let (headers, rows) = decode_all(&[
            b"\xEF",
            b"\xBB",
            b"\xBFTime(GMT),Episode\n2023-01-05 10:00:00,Pilot\n",
        ]);

        assert_eq!(headers.unwrap(), vec!["Time(GMT)", "Episode"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Time(GMT)"), Some("2023-01-05 10:00:00"));
    }

    #[test]
    fn test_decoder_keeps_quoted_newlines_across_chunks() {
        let (_, rows) = decode_all(&[
            b"Time(GMT),Episode\n2023-01-05,\"Part one",
            b"\nand two\"\n2023-01-06,Sec",
            b"ond",
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Episode"), Some("Part one\nand two"));
        assert_eq!(rows[1].get("Episode"), Some("Second"));
        assert_eq!(rows[1].ordinal, 2);
    }

    #[test]
    fn test_decoder_handles_crlf_and_blank_lines() {
        let (_, rows) = decode_all(&[b"Time(GMT),Episode\r\n\r\n2023-01-05,A\r\n2023-01-06,B\r\n"]);
        let episodes: Vec<_> = rows.iter().map(|r| r.get("Episode").unwrap()).collect();
        assert_eq!(episodes, vec!["A", "B"]);
    }

    #[test]
    fn test_decoder_without_bom_or_rows() {
        let (headers, rows) = decode_all(&[b"Time(GMT),Episode"]);
        assert_eq!(headers.unwrap().len(), 2);
        assert!(rows.is_empty());

        let (headers, rows) = decode_all(&[b""]);
        assert!(headers.is_none());
        assert!(rows.is_empty());
    }

    fn one_shot(input: &[u8]) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input)
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_decoder_agrees_with_csv_reader_on_stray_quotes() {
        let input: &[u8] =
            b"Time(GMT),Episode\n2023-01-02,5\" mic\n2023-01-03,\"multi\nline\"\n2023-01-04,last\n";
        let expected = one_shot(input);
        assert_eq!(expected.len(), 4);

        for size in [1, 2, 4, 9, input.len()] {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let (headers, rows) = decode_all(&chunks);

            let mut decoded = vec![headers.unwrap()];
            decoded.extend(
                rows.into_iter()
                    .map(|row| row.fields.into_iter().map(|(_, v)| v).collect()),
            );
            assert_eq!(decoded, expected, "chunk size {}", size);
        }
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = RowDecoder::new();
        assert!(decoder.feed(b"Time(GMT),Episode\n2023-01-05,\xFF\xFE\n").is_err());
    }

    #[test]
    fn test_watermark_filter_is_inclusive() {
        let ex = extractor("2023-01-01T00:00:00");
        let partition = Partition::podcast_year("1", 2023);

        let before = ex
            .post_process(row(1, "2022-12-31T23:59:59"), &file("2023-1", 0), &partition)
            .unwrap();
        assert!(before.is_none());

        let at = ex
            .post_process(row(2, "2023-01-01T00:00:00"), &file("2023-1", 0), &partition)
            .unwrap();
        assert!(at.is_some());
    }

    #[test]
    fn test_spreadsheet_escape_is_stripped_before_parsing() {
        let ex = extractor("2023-01-01");
        let record = ex
            .post_process(
                row(1, "'2023-03-04 05:06:07"),
                &file("2023-3", 0),
                &Partition::podcast_year("1", 2023),
            )
            .unwrap()
            .unwrap();

        // 原始值照樣輸出，只在比較時去掉引號
        assert_eq!(record.get_str("Time(GMT)"), Some("'2023-03-04 05:06:07"));
    }

    #[test]
    fn test_missing_or_bad_timestamp_fails_loudly() {
        let ex = extractor("2023-01-01");
        let partition = Partition::podcast_year("1", 2023);

        let no_column = CsvRow {
            ordinal: 1,
            fields: vec![("Episode".to_string(), "Pilot".to_string())],
        };
        assert!(matches!(
            ex.post_process(no_column, &file("2023-1", 0), &partition),
            Err(TapError::MalformedResponse { .. })
        ));

        assert!(matches!(
            ex.post_process(row(2, "last tuesday"), &file("2023-1", 0), &partition),
            Err(TapError::MalformedResponse { .. })
        ));

        assert!(ex
            .post_process(row(3, ""), &file("2023-1", 0), &partition)
            .is_err());
    }

    #[test]
    fn test_timestamp_header_match_is_loose() {
        let ex = extractor("2023-01-01");
        let spaced = CsvRow {
            ordinal: 1,
            fields: vec![("Time (GMT)".to_string(), "2023-02-01".to_string())],
        };
        assert!(ex.row_timestamp(&spaced, &file("2023-2", 0)).is_ok());
    }

    #[test]
    fn test_record_shape_and_composite_key() {
        let ex = extractor("2023-01-01");
        let partition = Partition::podcast_year("42", 2023);

        let record = ex
            .post_process(row(7, "2023-02-01"), &file("2023-2", 1), &partition)
            .unwrap()
            .unwrap();

        let keys: Vec<_> = record.data.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["podcast_id", "file_key", "record_key", "Time(GMT)", "Episode"]
        );
        assert_eq!(
            record.primary_key(),
            vec![json!("42"), json!("2023-2#1"), json!(7)]
        );
    }

    #[test]
    fn test_rows_from_different_files_never_collide() {
        let ex = extractor("2023-01-01");
        let partition = Partition::podcast_year("1", 2023);
        let files = [file("2023-2", 0), file("2023-2", 1), file("2023-3", 0)];

        let mut keys = std::collections::HashSet::new();
        for f in &files {
            for ordinal in 1..=3 {
                let record = ex
                    .post_process(row(ordinal, "2023-02-01"), f, &partition)
                    .unwrap()
                    .unwrap();
                assert!(keys.insert(record.primary_key().iter().map(|v| v.to_string()).collect::<Vec<_>>()));
            }
        }
        assert_eq!(keys.len(), 9);
    }

    #[test]
    fn test_csv_column_cannot_override_synthetic_key() {
        let ex = extractor("2023-01-01");
        let sneaky = CsvRow {
            ordinal: 1,
            fields: vec![
                ("Time(GMT)".to_string(), "2023-02-01".to_string()),
                ("podcast_id".to_string(), "other".to_string()),
            ],
        };

        let record = ex
            .post_process(sneaky, &file("2023-2", 0), &Partition::podcast_year("1", 2023))
            .unwrap()
            .unwrap();
        assert_eq!(record.get_str("podcast_id"), Some("1"));
    }

    #[tokio::test]
    async fn test_stream_rows_reads_downloaded_csv() {
        let server = MockServer::start();
        let csv_mock = server.mock(|when, then| {
            when.method(GET).path("/exports/2023-1.csv");
            then.status(200)
                .header("Content-Type", "text/csv")
                .body("\u{FEFF}Time(GMT),Episode,Downloads\n2023-01-02 00:00:00,Pilot,10\n2023-01-03 00:00:00,Second,4\n");
        });

        let client = ApiClient::new(reqwest::Client::new(), server.base_url());
        let source = SourceFile {
            bucket_key: "2023-1".to_string(),
            index: 0,
            url: server.url("/exports/2023-1.csv"),
        };

        let mut rows = extractor("2023-01-01")
            .stream_rows(&client, &source)
            .await
            .unwrap();

        let first = rows.next_row().await.unwrap().unwrap();
        assert_eq!(first.ordinal, 1);
        assert_eq!(first.get("Time(GMT)"), Some("2023-01-02 00:00:00"));
        assert_eq!(first.get("Downloads"), Some("10"));

        let second = rows.next_row().await.unwrap().unwrap();
        assert_eq!(second.get("Episode"), Some("Second"));

        assert!(rows.next_row().await.unwrap().is_none());
        assert!(rows.next_row().await.unwrap().is_none());
        csv_mock.assert();
    }

    #[tokio::test]
    async fn test_stream_rows_surfaces_http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/exports/gone.csv");
            then.status(404);
        });

        let client = ApiClient::new(reqwest::Client::new(), server.base_url());
        let source = SourceFile {
            bucket_key: "2023-1".to_string(),
            index: 0,
            url: server.url("/exports/gone.csv"),
        };

        let err = extractor("2023-01-01")
            .stream_rows(&client, &source)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TapError::Transport { status: Some(404), .. }));
    }
}
