use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use image::ImageFormat;
use rand::{thread_rng, RngCore};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/gif"];
const SNIFF_LEN: usize = 16;

/// Uploaded images written under a single local directory.
#[derive(Clone, Debug)]
pub struct DiskStorage {
    root: PathBuf,
    max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug)]
pub enum UploadError {
    UnsupportedType,
    TooLarge { limit: u64 },
    Stream(String),
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType => write!(f, "unsupported file type"),
            Self::TooLarge { limit } => write!(f, "file exceeds {} bytes", limit),
            Self::Stream(message) => write!(f, "upload stream failed: {}", message),
            Self::Io(err) => write!(f, "upload write failed: {}", err),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl DiskStorage {
    pub async fn new(root: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, max_bytes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Streams one file to disk. The stored name's extension follows the
    /// sniffed image format, never the client's file name. Nothing is left
    /// behind when this fails.
    pub async fn store<S, E>(&self, content_type: Option<&str>, stream: S) -> Result<StoredFile, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        content_type
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| ALLOWED_CONTENT_TYPES.contains(&value.as_str()))
            .ok_or(UploadError::UnsupportedType)?;

        let mut stream = std::pin::pin!(stream);
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut buffered = Vec::new();
        let mut size: u64 = 0;

        while head.len() < SNIFF_LEN {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk.map_err(|err| UploadError::Stream(err.to_string()))?;
            size = self.checked_size(size, &chunk)?;
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            buffered.push(chunk);
        }
        let format = sniff_image(&head)?;

        let file_name = random_file_name(format);
        let path = self.root.join(&file_name);
        let mut file = fs::File::create(&path).await?;

        match self.write_stream(&mut file, buffered, stream, size).await {
            Ok(size) => {
                drop(file);
                tracing::debug!(file_name = %file_name, size, "stored upload");
                Ok(StoredFile { file_name, size })
            }
            Err(err) => {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path).await {
                    tracing::warn!(error = %remove_err, path = %path.display(), "failed to remove partial upload");
                }
                Err(err)
            }
        }
    }

    async fn write_stream<S, E>(
        &self,
        file: &mut fs::File,
        buffered: Vec<Bytes>,
        mut rest: S,
        mut size: u64,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        for chunk in buffered {
            file.write_all(&chunk).await?;
        }

        while let Some(chunk) = rest.next().await {
            let chunk = chunk.map_err(|err| UploadError::Stream(err.to_string()))?;
            size = self.checked_size(size, &chunk)?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(size)
    }

    fn checked_size(&self, size: u64, chunk: &Bytes) -> Result<u64, UploadError> {
        let size = size + chunk.len() as u64;
        if size > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(size)
    }

    /// Deletes a stored file; a missing file is not an error.
    pub async fn remove(&self, file_name: &str) -> io::Result<()> {
        match fs::remove_file(self.root.join(file_name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn sniff_image(head: &[u8]) -> Result<ImageFormat, UploadError> {
    match image::guess_format(head) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif)) => Ok(format),
        _ => Err(UploadError::UnsupportedType),
    }
}

fn random_file_name(format: ImageFormat) -> String {
    let mut random = [0u8; 6];
    thread_rng().fill_bytes(&mut random);
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("{}-{}{}", hex::encode(random), millis, extension_for(format))
}

fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => ".png",
        ImageFormat::Gif => ".gif",
        _ => ".jpg",
    }
}
