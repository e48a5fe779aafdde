use crate::domain::model::Record;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Downstream consumer of extracted records.
#[async_trait]
pub trait RecordSink: Send {
    async fn begin_stream(&mut self, stream: &str, key_properties: &[String]) -> Result<()>;
    async fn write_record(&mut self, stream: &str, record: &Record) -> Result<()>;
    async fn finish(&mut self) -> Result<()>;
}

/// Source of "now" for token expiry and year enumeration.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
