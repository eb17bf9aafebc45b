//! Thumbnail rendering.
//!
//! The cache only needs "source bytes in, encoded image out". `ConvertRenderer`
//! does that with ImageMagick's `convert`, which in turn needs Ghostscript for
//! PDF sources.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};
use thiserror::Error;
use tokio::{process::Command, sync::OnceCell};
use tracing::debug;
use uuid::Uuid;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Best-effort MIME type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or(OCTET_STREAM)
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("writing render input {path}: {source}")]
    Input { path: PathBuf, source: io::Error },
    #[error("running `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{0}` produced no output")]
    EmptyOutput(String),
}

/// What to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Bounding box edge in pixels.
    pub size: u32,
    /// Rasterize the first page instead of auto-orienting an image.
    pub is_pdf: bool,
    /// Extension hint for the converter, taken from the source name.
    pub extension: Option<String>,
}

impl RenderRequest {
    pub fn new(size: u32, is_pdf: bool) -> Self {
        Self {
            size,
            is_pdf,
            extension: None,
        }
    }

    /// Take the extension hint from `name`, keeping only ASCII alphanumerics.
    pub fn with_extension_from(mut self, name: &str) -> Self {
        self.extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                ext.chars()
                    .filter(char::is_ascii_alphanumeric)
                    .collect::<String>()
            })
            .filter(|ext| !ext.is_empty());
        self
    }

    /// ImageMagick geometry: fit inside `size`x`size`, only ever shrinking.
    pub fn geometry(&self) -> String {
        format!("{0}x{0}>", self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait ThumbnailRenderer: Send + Sync {
    /// Whether the image converter can run at all.
    async fn converter_available(&self) -> bool;

    /// Whether PDF sources can be rasterized.
    async fn rasterizer_available(&self) -> bool;

    async fn render(
        &self,
        source: &[u8],
        request: &RenderRequest,
    ) -> Result<RenderedImage, RenderError>;
}

/// Renderer backed by the ImageMagick and Ghostscript command-line tools.
pub struct ConvertRenderer {
    convert: String,
    ghostscript: String,
    temp_dir: PathBuf,
    convert_ok: OnceCell<bool>,
    ghostscript_ok: OnceCell<bool>,
}

impl Default for ConvertRenderer {
    fn default() -> Self {
        Self::new("convert", "gs")
    }
}

impl ConvertRenderer {
    pub fn new(convert: impl Into<String>, ghostscript: impl Into<String>) -> Self {
        Self {
            convert: convert.into(),
            ghostscript: ghostscript.into(),
            temp_dir: std::env::temp_dir(),
            convert_ok: OnceCell::new(),
            ghostscript_ok: OnceCell::new(),
        }
    }

    /// Directory for render inputs (defaults to the system temp dir).
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    fn command(&self, input: &Path, request: &RenderRequest) -> Command {
        let mut cmd = Command::new(&self.convert);
        if request.is_pdf {
            cmd.arg(format!("{}[0]", input.display()))
                .arg("-thumbnail")
                .arg(request.geometry())
                .arg("png:-");
        } else {
            cmd.arg(input)
                .arg("-auto-orient")
                .arg("-thumbnail")
                .arg(request.geometry())
                .arg("-");
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

/// `true` if `<program> -version` runs and exits cleanly.
async fn program_available(program: &str) -> bool {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) => status.success(),
        Err(err) => {
            debug!("`{}` not usable: {}", program, err);
            false
        }
    }
}

#[async_trait]
impl ThumbnailRenderer for ConvertRenderer {
    async fn converter_available(&self) -> bool {
        *self.convert_ok.get_or_init(|| program_available(&self.convert)).await
    }

    async fn rasterizer_available(&self) -> bool {
        *self
            .ghostscript_ok
            .get_or_init(|| program_available(&self.ghostscript))
            .await
    }

    async fn render(
        &self,
        source: &[u8],
        request: &RenderRequest,
    ) -> Result<RenderedImage, RenderError> {
        let input = RenderInput::write(&self.temp_dir, request.extension.as_deref(), source).await?;

        let output = self
            .command(input.path(), request)
            .output()
            .await
            .map_err(|source| RenderError::Spawn {
                program: self.convert.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                program: self.convert.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(RenderError::EmptyOutput(self.convert.clone()));
        }

        let mime_type = sniff_mime(&output.stdout).to_string();
        debug!(
            "rendered {} bytes of {} at {}",
            output.stdout.len(),
            mime_type,
            request.geometry()
        );
        Ok(RenderedImage {
            bytes: Bytes::from(output.stdout),
            mime_type,
        })
    }
}

/// Source bytes on disk for the converter. Removed when dropped, whichever
/// way rendering ends.
struct RenderInput {
    path: PathBuf,
}

impl RenderInput {
    async fn write(dir: &Path, extension: Option<&str>, bytes: &[u8]) -> Result<Self, RenderError> {
        let name = match extension {
            Some(ext) => format!("thumbnail-{}.{}", Uuid::new_v4(), ext),
            None => format!("thumbnail-{}", Uuid::new_v4()),
        };
        let input = Self {
            path: dir.join(name),
        };
        tokio::fs::write(&input.path, bytes)
            .await
            .map_err(|source| RenderError::Input {
                path: input.path.clone(),
                source,
            })?;
        Ok(input)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RenderInput {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed render input {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(
                "failed to remove render input {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}
