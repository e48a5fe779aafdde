use crate::core::source::{find_stream, StreamDescriptor, STREAMS};
use crate::utils::error::{Result, TapError};
use crate::utils::validation::{validate_path, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "podbean-tap")]
#[command(about = "Extract podcasts, episodes and analytics reports from the Podbean API")]
pub struct CliArgs {
    /// TOML or JSON config file
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Write records to this file instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Comma-separated stream names; all streams when omitted
    #[arg(long, value_delimiter = ',')]
    pub streams: Vec<String>,

    #[arg(long, short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(long, help = "Print the extraction plan without calling the API")]
    pub dry_run: bool,
}

impl CliArgs {
    /// Streams to run, in table order.
    pub fn selected_streams(&self) -> Result<Vec<&'static StreamDescriptor>> {
        let requested: Vec<&str> = self
            .streams
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if requested.is_empty() {
            return Ok(STREAMS.iter().collect());
        }

        if let Some(unknown) = requested.iter().find(|name| find_stream(name).is_none()) {
            let known: Vec<&str> = STREAMS.iter().map(|s| s.name).collect();
            return Err(TapError::InvalidConfigValueError {
                field: "streams".to_string(),
                value: unknown.to_string(),
                reason: format!("Unknown stream; expected one of: {}", known.join(", ")),
            });
        }

        Ok(STREAMS
            .iter()
            .filter(|s| requested.contains(&s.name))
            .collect())
    }
}

impl Validate for CliArgs {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config.to_string_lossy())?;
        if let Some(output) = &self.output {
            validate_path("output", &output.to_string_lossy())?;
        }
        self.selected_streams().map(|_| ())
    }
}
