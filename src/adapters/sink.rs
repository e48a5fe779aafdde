use crate::domain::model::Record;
use crate::domain::ports::RecordSink;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Writes one JSON message per line: a `SCHEMA` message when a stream starts,
/// then a `RECORD` message per record.
pub struct JsonLinesSink<W> {
    writer: W,
    lines: u64,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_message(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.lines += 1;
        Ok(())
    }
}

impl JsonLinesSink<BufWriter<tokio::io::Stdout>> {
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(tokio::io::stdout()))
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// 建立輸出檔，必要時建立上層目錄
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = File::create(path).await?;
        tracing::debug!("Writing records to {}", path.display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RecordSink for JsonLinesSink<W> {
    async fn begin_stream(&mut self, stream: &str, key_properties: &[String]) -> Result<()> {
        let message = json!({
            "type": "SCHEMA",
            "stream": stream,
            "schema": {"type": "object"},
            "key_properties": key_properties,
        });
        self.write_message(&message).await
    }

    async fn write_record(&mut self, stream: &str, record: &Record) -> Result<()> {
        let message = json!({
            "type": "RECORD",
            "stream": stream,
            "record": record.data,
        });
        self.write_message(&message).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
