use crate::domain::model::{PageCursor, Partition, Record};
use crate::utils::error::{Result, TapError};
use serde_json::{Map, Value};

/// How a stream is split into independent extraction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    None,
    PerPodcast,
    PerPodcastYear,
}

/// Where the records live in a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordsPath {
    /// An array under this key.
    Key(&'static str),
    /// The whole body is a single record.
    WholeBody,
    /// A `download_urls` envelope pointing at CSV files.
    ReportEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    Passthrough,
    /// Prefix the record with the partition's `podcast_id`.
    TagPodcast,
    /// CSV report rows; the value names the row timestamp column.
    CsvReport { timestamp_column: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: &'static str,
    pub path: &'static str,
    pub records: RecordsPath,
    pub key_properties: &'static [&'static str],
    pub partitioning: Partitioning,
    pub paginated: bool,
    pub extra_params: &'static [(&'static str, &'static str)],
    pub post_process: PostProcess,
}

impl StreamDescriptor {
    pub fn is_csv_report(&self) -> bool {
        matches!(self.post_process, PostProcess::CsvReport { .. })
    }

    pub fn key_properties(&self) -> Vec<String> {
        self.key_properties.iter().map(|k| k.to_string()).collect()
    }
}

pub const REPORT_TIMESTAMP_COLUMN: &str = "Time(GMT)";
pub const REPORT_KEY_PROPERTIES: &[&str] = &["podcast_id", "file_key", "record_key"];
pub const ANALYTIC_REPORT_TYPES: &[&str] = &["followers", "likes", "comments", "total_episode_length"];

pub const STREAMS: &[StreamDescriptor] = &[
    StreamDescriptor {
        name: "private_members",
        path: "/v1/privateMembers",
        records: RecordsPath::Key("private_members"),
        key_properties: &["email"],
        partitioning: Partitioning::None,
        paginated: true,
        extra_params: &[],
        post_process: PostProcess::Passthrough,
    },
    StreamDescriptor {
        name: "podcasts",
        path: "/v1/podcasts",
        records: RecordsPath::Key("podcasts"),
        key_properties: &["id"],
        partitioning: Partitioning::None,
        paginated: true,
        extra_params: &[],
        post_process: PostProcess::Passthrough,
    },
    StreamDescriptor {
        name: "episodes",
        path: "/v1/episodes",
        records: RecordsPath::Key("episodes"),
        key_properties: &["id"],
        partitioning: Partitioning::PerPodcast,
        paginated: true,
        extra_params: &[],
        post_process: PostProcess::Passthrough,
    },
    StreamDescriptor {
        name: "podcast_download_reports",
        path: "/v1/analytics/podcastReports",
        records: RecordsPath::ReportEnvelope,
        key_properties: REPORT_KEY_PROPERTIES,
        partitioning: Partitioning::PerPodcastYear,
        paginated: true,
        extra_params: &[],
        post_process: PostProcess::CsvReport {
            timestamp_column: REPORT_TIMESTAMP_COLUMN,
        },
    },
    StreamDescriptor {
        name: "podcast_engagement_reports",
        path: "/v1/analytics/podcastEngagementReports",
        records: RecordsPath::ReportEnvelope,
        key_properties: REPORT_KEY_PROPERTIES,
        partitioning: Partitioning::PerPodcastYear,
        paginated: true,
        extra_params: &[],
        post_process: PostProcess::CsvReport {
            timestamp_column: REPORT_TIMESTAMP_COLUMN,
        },
    },
    StreamDescriptor {
        name: "podcast_analytic_reports",
        path: "/v1/analytics/podcastAnalyticReports",
        records: RecordsPath::WholeBody,
        key_properties: &["podcast_id"],
        partitioning: Partitioning::PerPodcast,
        paginated: false,
        extra_params: &[
            ("types[]", "followers"),
            ("types[]", "likes"),
            ("types[]", "comments"),
            ("types[]", "total_episode_length"),
        ],
        post_process: PostProcess::TagPodcast,
    },
];

pub fn find_stream(name: &str) -> Option<&'static StreamDescriptor> {
    STREAMS.iter().find(|stream| stream.name == name)
}

/// Partitions for one stream. Tenant-major; years ascending.
pub fn partitions(
    descriptor: &StreamDescriptor,
    tenant_ids: &[String],
    start_year: i32,
    current_year: i32,
) -> Vec<Partition> {
    match descriptor.partitioning {
        Partitioning::None => Vec::new(),
        Partitioning::PerPodcast => tenant_ids.iter().map(Partition::podcast).collect(),
        Partitioning::PerPodcastYear => tenant_ids
            .iter()
            .flat_map(|id| (start_year..=current_year).map(move |year| Partition::podcast_year(id, year)))
            .collect(),
    }
}

/// Generic extraction logic for one stream, driven by its descriptor.
#[derive(Debug, Clone, Copy)]
pub struct RecordSource<'a> {
    descriptor: &'a StreamDescriptor,
}

impl<'a> RecordSource<'a> {
    pub fn new(descriptor: &'a StreamDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &'a StreamDescriptor {
        self.descriptor
    }

    pub fn build_params(
        &self,
        partition: Option<&Partition>,
        cursor: Option<&PageCursor>,
        access_token: &str,
    ) -> Vec<(String, String)> {
        let mut params = vec![("access_token".to_string(), access_token.to_string())];

        if self.descriptor.paginated {
            if let Some(cursor) = cursor {
                params.push(("offset".to_string(), cursor.offset.to_string()));
                params.push(("limit".to_string(), cursor.limit.to_string()));
            }
        }

        if let Some(partition) = partition {
            params.push(("podcast_id".to_string(), partition.podcast_id.clone()));
            if let Some(year) = partition.year {
                params.push(("year".to_string(), year.to_string()));
            }
        }

        params.extend(
            self.descriptor
                .extra_params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );

        params
    }

    /// Raw records from one JSON page.
    pub fn parse(&self, response_body: &Value) -> Result<Vec<Value>> {
        let records = match self.descriptor.records {
            RecordsPath::Key(key) => match response_body.get(key) {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => {
                    return Err(self.malformed(format!(
                        "expected an array under '{}', got {}",
                        key,
                        json_kind(other)
                    )))
                }
                None => return Err(self.malformed(format!("missing '{}' in envelope", key))),
            },
            RecordsPath::WholeBody => vec![response_body.clone()],
            RecordsPath::ReportEnvelope => {
                return Err(self.malformed(
                    "report envelopes are handled by the CSV report extractor".to_string(),
                ))
            }
        };

        if let Some(bad) = records.iter().find(|record| !record.is_object()) {
            return Err(self.malformed(format!(
                "expected object records, got {}",
                json_kind(bad)
            )));
        }

        Ok(records)
    }

    /// Shapes one raw JSON object into an output record. `None` drops it.
    pub fn post_process(&self, raw: Value, partition: Option<&Partition>) -> Option<Record> {
        let Value::Object(fields) = raw else {
            return None;
        };

        let data = match (self.descriptor.post_process, partition) {
            (PostProcess::TagPodcast, Some(partition)) => {
                tag_podcast(&partition.podcast_id, fields)
            }
            _ => fields,
        };

        Some(Record::new(self.descriptor.key_properties, data))
    }

    fn malformed(&self, message: String) -> TapError {
        TapError::malformed(self.descriptor.path, message)
    }
}

/// New object with `podcast_id` first; the partition's id wins over any field in the row.
pub(crate) fn tag_podcast(podcast_id: &str, fields: Map<String, Value>) -> Map<String, Value> {
    let mut data = Map::with_capacity(fields.len() + 1);
    data.insert(
        "podcast_id".to_string(),
        Value::String(podcast_id.to_string()),
    );
    for (key, value) in fields {
        data.entry(key).or_insert(value);
    }
    data
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(name: &str) -> &'static StreamDescriptor {
        find_stream(name).unwrap()
    }

    #[test]
    fn test_stream_table_names_are_unique() {
        let mut names: Vec<_> = STREAMS.iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), STREAMS.len());
    }

    #[test]
    fn test_partitions_per_podcast_and_year() {
        let tenants = vec!["1".to_string(), "2".to_string()];

        assert!(partitions(stream("podcasts"), &tenants, 2023, 2024).is_empty());
        assert_eq!(
            partitions(stream("episodes"), &tenants, 2023, 2024),
            vec![Partition::podcast("1"), Partition::podcast("2")]
        );
        assert_eq!(
            partitions(stream("podcast_download_reports"), &tenants, 2023, 2024),
            vec![
                Partition::podcast_year("1", 2023),
                Partition::podcast_year("1", 2024),
                Partition::podcast_year("2", 2023),
                Partition::podcast_year("2", 2024),
            ]
        );
    }

    #[test]
    fn test_start_year_after_current_year_yields_no_year_partitions() {
        let tenants = vec!["1".to_string()];
        assert!(partitions(stream("podcast_engagement_reports"), &tenants, 2030, 2024).is_empty());
    }

    #[test]
    fn test_build_params_for_paginated_partition() {
        let source = RecordSource::new(stream("podcast_download_reports"));
        let partition = Partition::podcast_year("1", 2023);
        let cursor = PageCursor { offset: 0, limit: 50 };

        let params = source.build_params(Some(&partition), Some(&cursor), "T1");
        assert_eq!(
            params,
            vec![
                ("access_token".to_string(), "T1".to_string()),
                ("offset".to_string(), "0".to_string()),
                ("limit".to_string(), "50".to_string()),
                ("podcast_id".to_string(), "1".to_string()),
                ("year".to_string(), "2023".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_params_for_analytic_reports() {
        let source = RecordSource::new(stream("podcast_analytic_reports"));
        let partition = Partition::podcast("7");
        let cursor = PageCursor { offset: 0, limit: 20 };

        let params = source.build_params(Some(&partition), Some(&cursor), "T7");
        assert!(!params.iter().any(|(k, _)| k == "offset" || k == "limit"));
        let types: Vec<_> = params
            .iter()
            .filter(|(k, _)| k == "types[]")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(types, ANALYTIC_REPORT_TYPES);
    }

    #[test]
    fn test_parse_records_under_key() {
        let source = RecordSource::new(stream("podcasts"));
        let body = json!({"podcasts": [{"id": "a"}, {"id": "b"}], "has_more": false});
        assert_eq!(source.parse(&body).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_missing_key_is_malformed() {
        let source = RecordSource::new(stream("episodes"));
        let err = source.parse(&json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, TapError::MalformedResponse { .. }));

        let err = source.parse(&json!({"episodes": {"id": 1}})).unwrap_err();
        assert!(matches!(err, TapError::MalformedResponse { .. }));

        let err = source.parse(&json!({"episodes": [1, 2]})).unwrap_err();
        assert!(matches!(err, TapError::MalformedResponse { .. }));
    }

    #[test]
    fn test_whole_body_record_is_tagged_with_podcast_first() {
        let source = RecordSource::new(stream("podcast_analytic_reports"));
        let body = json!({"followers": {"2023-01": 4}, "likes": {}});
        let raw = source.parse(&body).unwrap().remove(0);

        let record = source
            .post_process(raw, Some(&Partition::podcast("7")))
            .unwrap();

        let keys: Vec<_> = record.data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["podcast_id", "followers", "likes"]);
        assert_eq!(record.primary_key(), vec![json!("7")]);
    }

    #[test]
    fn test_passthrough_keeps_fields() {
        let source = RecordSource::new(stream("episodes"));
        let record = source
            .post_process(json!({"id": "e1", "title": "Pilot"}), Some(&Partition::podcast("1")))
            .unwrap();

        assert_eq!(record.get_str("title"), Some("Pilot"));
        assert!(!record.data.contains_key("podcast_id"));
        assert_eq!(record.key_properties, vec!["id"]);
    }
}
