use anyhow::{Context, Result, bail};
use attachment_store::{
    ConvertRenderer, SettingsFile, StorageConnection, ThumbnailCache,
    models::{
        metadata::{Metadata, sha256_hex},
        object::{PutOptions, UploadSource},
        thumbnail::ThumbnailOutcome,
    },
};
use clap::Parser;
use std::{path::Path, sync::Arc};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Environment + logging setup ---
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!(
        "Using storage settings {} [{}]",
        args.config.display(),
        args.environment
    );

    // --- Settings are read once, off the async workers ---
    let config = SettingsFile::new(args.config, args.environment)
        .load_async()
        .await?;
    let storage = Arc::new(StorageConnection::new(config));

    run(args.command, storage).await
}

async fn run(command: Command, storage: Arc<StorageConnection>) -> Result<()> {
    match command {
        Command::Put {
            file,
            name,
            folder,
            content_type,
            digest,
        } => {
            let original_name = file_name(&file)?;
            let name = name.unwrap_or_else(|| original_name.clone());
            let mut opts = PutOptions::default();
            if let Some(folder) = folder {
                opts = opts.in_folder(folder);
            }

            if digest {
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?;
                opts = opts.with_digest(sha256_hex(&bytes));
                storage
                    .put(&name, &original_name, bytes, &content_type, &opts)
                    .await?;
            } else {
                let reader = tokio::fs::File::open(&file)
                    .await
                    .with_context(|| format!("opening {}", file.display()))?;
                storage
                    .put_stream(
                        &name,
                        &original_name,
                        UploadSource::from_reader(reader),
                        &content_type,
                        &opts,
                    )
                    .await?;
            }
            println!("{}", storage.key_for(&name, opts.target_folder.as_deref())?);
        }
        Command::Get {
            name,
            folder,
            output,
        } => {
            let data = storage.object_data(&name, folder.as_deref()).await?;
            write_output(output.as_deref(), &data).await?;
        }
        Command::Exists { name, folder } => {
            let exists = storage.object_exists(&name, folder.as_deref()).await?;
            println!("{exists}");
        }
        Command::Delete { name, folder } => {
            storage.delete(&name, folder.as_deref()).await?;
        }
        Command::Purge { prefix } => {
            let deleted = storage.batch_delete(&prefix).await?;
            println!("deleted {deleted} objects");
        }
        Command::Mv { src, dest, folder } => {
            if !storage.move_object(&src, &dest, folder.as_deref()).await? {
                bail!("not moved: `{src}` is missing or `{dest}` already exists");
            }
        }
        Command::SetMeta {
            name,
            pairs,
            folder,
        } => {
            let updates: Metadata = pairs.into_iter().collect();
            if !storage
                .update_object_metadata(&name, updates, folder.as_deref())
                .await?
            {
                bail!("object `{name}` not found");
            }
        }
        Command::Thumbnail {
            source,
            target,
            size,
            pdf,
            output,
        } => {
            let cache = ThumbnailCache::new(storage, Arc::new(ConvertRenderer::default()));
            match cache.generate(&source, &target, size, pdf).await? {
                ThumbnailOutcome::Hit(thumbnail) => {
                    tracing::info!(
                        "thumbnail {} digest {}",
                        target,
                        thumbnail.digest.as_deref().unwrap_or("-")
                    );
                    write_output(output.as_deref(), &thumbnail.bytes).await?;
                }
                ThumbnailOutcome::Miss(reason) => bail!("no thumbnail: {reason}"),
            }
        }
        Command::PurgeThumbnails { prefix } => {
            let cache = ThumbnailCache::new(storage, Arc::new(ConvertRenderer::default()));
            let deleted = cache.batch_delete(&prefix).await?;
            println!("deleted {deleted} thumbnails");
        }
        Command::Check => {
            storage.verify().await?;
            println!("ok");
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("no file name in {}", path.display()))
}

async fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
