//! Archive creation: one writer over the supported container formats.

use super::ArchiveType;
use crate::error::VfsError;
use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use xz2::write::XzEncoder;

enum Sink {
    Zip(zip::ZipWriter<File>),
    Tar(tar::Builder<File>),
    TarGz(tar::Builder<GzEncoder<File>>),
    TarBz2(tar::Builder<BzEncoder<File>>),
    TarXz(tar::Builder<XzEncoder<File>>),
}

/// Writes one archive file member by member.
pub struct ArchiveWriter {
    sink: Sink,
    archive_type: ArchiveType,
}

impl ArchiveWriter {
    /// Opens a writer on `target` for the given format.
    pub fn create(target: &Path, archive_type: ArchiveType) -> Result<ArchiveWriter, VfsError> {
        let target_str = target.to_string_lossy().to_string();
        let file = File::create(target).map_err(|e| VfsError::from_io(e, &target_str))?;
        let sink = match archive_type {
            ArchiveType::Zip => Sink::Zip(zip::ZipWriter::new(file)),
            ArchiveType::Tar => Sink::Tar(tar::Builder::new(file)),
            ArchiveType::TarGz => Sink::TarGz(tar::Builder::new(GzEncoder::new(
                file,
                flate2::Compression::default(),
            ))),
            ArchiveType::TarBz2 => Sink::TarBz2(tar::Builder::new(BzEncoder::new(
                file,
                bzip2::Compression::default(),
            ))),
            ArchiveType::TarXz => Sink::TarXz(tar::Builder::new(XzEncoder::new(file, 6))),
        };
        Ok(ArchiveWriter { sink, archive_type })
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    /// Appends one local file under the given member name.
    pub fn add_file(&mut self, member_name: &str, source: &Path) -> Result<(), VfsError> {
        let source_str = source.to_string_lossy().to_string();
        match &mut self.sink {
            Sink::Zip(writer) => {
                let mut options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(metadata) = std::fs::metadata(source) {
                        options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
                    }
                }
                writer
                    .start_file(member_name, options)
                    .map_err(|e| VfsError::io(&source_str, e.to_string()))?;
                let mut reader = File::open(source).map_err(|e| VfsError::from_io(e, &source_str))?;
                io::copy(&mut reader, writer).map_err(|e| VfsError::from_io(e, &source_str))?;
                Ok(())
            }
            Sink::Tar(builder) => append_tar(builder, member_name, source),
            Sink::TarGz(builder) => append_tar(builder, member_name, source),
            Sink::TarBz2(builder) => append_tar(builder, member_name, source),
            Sink::TarXz(builder) => append_tar(builder, member_name, source),
        }
    }

    /// Appends an explicit directory member.
    pub fn add_directory(&mut self, member_name: &str, source: &Path) -> Result<(), VfsError> {
        let source_str = source.to_string_lossy().to_string();
        match &mut self.sink {
            Sink::Zip(writer) => writer
                .add_directory(member_name, zip::write::SimpleFileOptions::default())
                .map_err(|e| VfsError::io(&source_str, e.to_string())),
            Sink::Tar(builder) => append_tar_dir(builder, member_name, source),
            Sink::TarGz(builder) => append_tar_dir(builder, member_name, source),
            Sink::TarBz2(builder) => append_tar_dir(builder, member_name, source),
            Sink::TarXz(builder) => append_tar_dir(builder, member_name, source),
        }
    }

    /// Finalizes the container (central directory, compressor trailer).
    pub fn finish(self) -> Result<(), VfsError> {
        let finish_err = |e: io::Error| VfsError::io("", format!("failed to finalize archive: {}", e));
        match self.sink {
            Sink::Zip(writer) => {
                writer
                    .finish()
                    .map_err(|e| VfsError::io("", format!("failed to finalize archive: {}", e)))?;
            }
            Sink::Tar(builder) => {
                let mut file = builder.into_inner().map_err(finish_err)?;
                file.flush().map_err(finish_err)?;
            }
            Sink::TarGz(builder) => {
                let encoder = builder.into_inner().map_err(finish_err)?;
                encoder.finish().map_err(finish_err)?;
            }
            Sink::TarBz2(builder) => {
                let encoder = builder.into_inner().map_err(finish_err)?;
                encoder.finish().map_err(finish_err)?;
            }
            Sink::TarXz(builder) => {
                let encoder = builder.into_inner().map_err(finish_err)?;
                encoder.finish().map_err(finish_err)?;
            }
        }
        Ok(())
    }
}

fn append_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    member_name: &str,
    source: &Path,
) -> Result<(), VfsError> {
    builder
        .append_path_with_name(source, member_name)
        .map_err(|e| VfsError::from_io(e, &source.to_string_lossy()))
}

fn append_tar_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    member_name: &str,
    source: &Path,
) -> Result<(), VfsError> {
    // tar member names for directories carry a trailing slash
    let name = format!("{}/", member_name.trim_end_matches('/'));
    builder
        .append_path_with_name(source, name)
        .map_err(|e| VfsError::from_io(e, &source.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::VfsPath;

    #[test]
    fn test_zip_round_trip_through_handler() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.txt");
        std::fs::write(&source, b"round trip").unwrap();

        let target = dir.path().join("out.zip");
        let mut writer = ArchiveWriter::create(&target, ArchiveType::Zip).unwrap();
        writer.add_file("in.txt", &source).unwrap();
        writer.finish().unwrap();

        let handler = crate::archive::ArchiveHandler::for_path(&VfsPath::from_std(&target)).unwrap();
        handler.open().unwrap();
        assert_eq!(handler.extract_to_bytes("in.txt").unwrap(), b"round trip");
    }

    #[test]
    fn test_tar_xz_round_trip_through_handler() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.bin");
        std::fs::write(&source, vec![42u8; 4096]).unwrap();

        let target = dir.path().join("out.tar.xz");
        let mut writer = ArchiveWriter::create(&target, ArchiveType::TarXz).unwrap();
        writer.add_file("data.bin", &source).unwrap();
        writer.finish().unwrap();

        let handler = crate::archive::ArchiveHandler::for_path(&VfsPath::from_std(&target)).unwrap();
        handler.open().unwrap();
        assert_eq!(handler.extract_to_bytes("data.bin").unwrap(), vec![42u8; 4096]);
    }
}
