// Submission inputs: figure out what a path points at and, for a folder of
// images, pack it into a single zip the service can ingest.

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::LumaError;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "webm", "mts", "m2ts", "3gp", "insv",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "tif", "tiff", "webp", "bmp", "dng", "exr",
];
const ARCHIVE_EXTENSION: &str = "zip";

/// What a submission path turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    Video(PathBuf),
    /// A zip of images or of several videos.
    Archive(PathBuf),
    /// A folder that has to be zipped before upload.
    ImageDirectory { path: PathBuf, media_files: usize },
}

impl CaptureInput {
    pub fn path(&self) -> &Path {
        match self {
            CaptureInput::Video(path) | CaptureInput::Archive(path) => path,
            CaptureInput::ImageDirectory { path, .. } => path,
        }
    }
}

/// Classify `path` without touching the network.
pub fn detect_input(path: &Path) -> Result<CaptureInput, LumaError> {
    let metadata = std::fs::metadata(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => {
            LumaError::InvalidInput(format!("{} does not exist", path.display()))
        }
        _ => LumaError::io(path, err),
    })?;

    if metadata.is_dir() {
        let media_files = count_media_files(path)?;
        if media_files == 0 {
            return Err(LumaError::InvalidInput(format!(
                "directory {} contains no images or videos",
                path.display()
            )));
        }
        return Ok(CaptureInput::ImageDirectory {
            path: path.to_path_buf(),
            media_files,
        });
    }

    if metadata.len() == 0 {
        return Err(LumaError::InvalidInput(format!("{} is empty", path.display())));
    }

    match extension_of(path).as_deref() {
        Some(ARCHIVE_EXTENSION) => Ok(CaptureInput::Archive(path.to_path_buf())),
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Ok(CaptureInput::Video(path.to_path_buf())),
        Some(ext) => Err(LumaError::InvalidInput(format!(
            "unsupported file type .{ext} for {}; submit a video, a zip or a directory of images",
            path.display()
        ))),
        None => Err(LumaError::InvalidInput(format!(
            "cannot tell the file type of {} without an extension",
            path.display()
        ))),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_media_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| {
        IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
    })
}

fn count_media_files(dir: &Path) -> Result<usize, LumaError> {
    let mut count = 0;
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|err| LumaError::Archive {
            path: dir.to_path_buf(),
            source: err.into(),
        })?;
        if entry.file_type().is_file() && is_media_file(entry.path()) {
            count += 1;
        }
    }
    Ok(count)
}

/// Write every regular file under `dir` into a zip on `writer`, keyed by its
/// `/`-separated path relative to `dir`. Returns the number of entries.
pub fn write_archive<W: Write + Seek>(dir: &Path, writer: W) -> Result<usize, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let mut entries = 0;

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata()?.len();

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u32::MAX as u64);
        zip.start_file(name, options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut zip)?;
        entries += 1;
    }

    zip.finish()?;
    Ok(entries)
}

/// Zip `dir` into a temporary file that is deleted when dropped.
pub fn archive_directory(dir: &Path) -> Result<NamedTempFile, LumaError> {
    let to_error = |source: ArchiveError| LumaError::Archive {
        path: dir.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::Builder::new()
        .prefix("luma-capture-")
        .suffix(".zip")
        .tempfile()
        .map_err(|err| to_error(err.into()))?;
    let entries = write_archive(dir, tmp.as_file_mut()).map_err(to_error)?;
    debug!(dir = %dir.display(), archive = %tmp.path().display(), entries, "compressed directory");
    Ok(tmp)
}

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to write zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
