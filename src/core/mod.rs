pub mod client;
pub mod csv_report;
pub mod driver;
pub mod paginator;
pub mod source;
pub mod watermark;

pub use client::ApiClient;
pub use csv_report::{CsvReportExtractor, CsvRow, CsvRowStream, SourceFile};
pub use driver::{ExtractionDriver, StreamSummary, SyncSummary};
pub use paginator::OffsetPaginator;
pub use source::{find_stream, RecordSource, StreamDescriptor, STREAMS};
pub use watermark::Watermark;
