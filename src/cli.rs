use attachment_store::models::object::DEFAULT_CONTENT_TYPE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Attachment and thumbnail object storage tool")]
pub struct Args {
    /// Settings document (overrides STORAGE_CONFIG)
    #[arg(long, env = "STORAGE_CONFIG", default_value = "config/storage.yml")]
    pub config: PathBuf,

    /// Section of the settings document to use (overrides STORAGE_ENV)
    #[arg(long, env = "STORAGE_ENV", default_value = "development")]
    pub environment: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a local file
    Put {
        file: PathBuf,
        /// Object name (defaults to the file name)
        name: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, default_value = DEFAULT_CONTENT_TYPE)]
        content_type: String,
        /// Store the SHA-256 digest as metadata (buffers the file)
        #[arg(long)]
        digest: bool,
    },
    /// Download an object to a file or stdout
    Get {
        name: String,
        #[arg(long)]
        folder: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report whether an object exists
    Exists {
        name: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Delete one object
    Delete {
        name: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Delete every object whose key starts with a prefix
    Purge { prefix: String },
    /// Rename an object without overwriting
    Mv {
        src: String,
        dest: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Merge KEY=VALUE pairs into an object's metadata
    SetMeta {
        name: String,
        #[arg(value_parser = parse_pair, required = true)]
        pairs: Vec<(String, String)>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Generate (or fetch) a thumbnail
    Thumbnail {
        source: String,
        target: String,
        #[arg(long, default_value_t = 100)]
        size: u32,
        #[arg(long)]
        pdf: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete cached thumbnails by name prefix
    PurgeThumbnails {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Verify credentials and bucket access
    Check,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
