use crate::error::ResolveError;
use camino::Utf8Path;
use flate2::read::GzDecoder;
use iacguard_types::CancellationToken;
use reqwest::blocking::Client;
use std::io::{Cursor, Read};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::debug;

const GIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    /// Detects the archive format from an `archive=` query parameter or the path suffix.
    pub(crate) fn detect(url: &str) -> Option<Self> {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let forced = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("archive="));
        let hint = forced.unwrap_or(path).to_ascii_lowercase();

        if hint.ends_with("zip") {
            Some(ArchiveKind::Zip)
        } else if hint.ends_with("tar.gz") || hint.ends_with("tgz") {
            Some(ArchiveKind::TarGz)
        } else if hint.ends_with("tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// Shallow clone of `url` at `reference` into `dest`. The clone is killed on cancellation.
pub(crate) fn fetch_git(
    url: &str,
    reference: Option<&str>,
    dest: &Utf8Path,
    cancel: &CancellationToken,
) -> Result<(), ResolveError> {
    debug!("cloning {} ({}) into {}", url, reference.unwrap_or("default branch"), dest);

    let mut shallow = git_command();
    shallow.args(["clone", "--quiet", "--depth", "1"]);
    if let Some(reference) = reference {
        shallow.args(["--branch", reference]);
    }
    shallow.arg(url).arg(dest.as_str());

    match run_git(shallow, url, "clone", cancel) {
        Ok(()) => Ok(()),
        Err(ResolveError::Git { .. }) if reference.is_some() => {
            // `--branch` only accepts branches and tags; fall back to a full clone for commits.
            let _ = std::fs::remove_dir_all(dest);
            let mut full = git_command();
            full.args(["clone", "--quiet"]).arg(url).arg(dest.as_str());
            run_git(full, url, "clone", cancel)?;

            let mut checkout = git_command();
            checkout
                .args(["-C", dest.as_str(), "checkout", "--quiet"])
                .args(reference);
            run_git(checkout, url, "checkout", cancel)
        }
        Err(e) => Err(e),
    }
}

fn git_command() -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

fn run_git(
    mut cmd: Command,
    url: &str,
    action: &'static str,
    cancel: &CancellationToken,
) -> Result<(), ResolveError> {
    let git_error = |message: String| ResolveError::Git {
        url: url.to_string(),
        action,
        message,
    };

    let mut child = cmd.spawn().map_err(|e| git_error(e.to_string()))?;
    loop {
        if cancel.is_cancelled() {
            kill(&mut child);
            cancel.check()?;
        }
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                let detail = stderr.trim();
                return Err(git_error(if detail.is_empty() {
                    status.to_string()
                } else {
                    detail.to_string()
                }));
            }
            Ok(None) => std::thread::sleep(GIT_POLL_INTERVAL),
            Err(e) => {
                kill(&mut child);
                return Err(git_error(e.to_string()));
            }
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Downloads an archive over HTTP(S) and unpacks it into `dest`.
pub(crate) fn fetch_archive(
    client: &Client,
    url: &str,
    dest: &Utf8Path,
    cancel: &CancellationToken,
) -> Result<(), ResolveError> {
    let kind = ArchiveKind::detect(url).ok_or_else(|| ResolveError::UnsupportedSource {
        source_str: url.to_string(),
    })?;

    cancel.check()?;
    debug!("downloading {}", url);
    let response = client.get(url).send().map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })?;
    if !response.status().is_success() {
        return Err(ResolveError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let bytes = response.bytes().map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })?;
    cancel.check()?;

    extract(kind, &bytes, dest).map_err(|message| ResolveError::Archive {
        url: url.to_string(),
        message,
    })
}

pub(crate) fn extract(kind: ArchiveKind, bytes: &[u8], dest: &Utf8Path) -> Result<(), String> {
    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
            archive.extract(dest.as_std_path()).map_err(|e| e.to_string())
        }
        ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(Cursor::new(bytes)))
            .unpack(dest.as_std_path())
            .map_err(|e| e.to_string()),
        ArchiveKind::Tar => tar::Archive::new(Cursor::new(bytes))
            .unpack(dest.as_std_path())
            .map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn utf8_root(tmp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path")
    }

    fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, contents) in files {
            writer
                .start_file(*path, zip::write::SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(contents.as_bytes()).expect("write");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn archive_kind_from_suffix_or_query() {
        assert_eq!(ArchiveKind::detect("https://x/m.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("https://x/m.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("https://x/m.tgz?sig=1"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("https://x/get?archive=zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("https://x/module"), None);
    }

    #[test]
    fn extracts_tar_gz_archives() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let dest = utf8_root(&tmp);
        let bytes = tar_gz(&[("main.tf", "resource \"a\" \"b\" {}"), ("sub/vars.tf", "")]);

        extract(ArchiveKind::TarGz, &bytes, &dest).expect("extract");
        assert!(dest.join("main.tf").is_file());
        assert!(dest.join("sub/vars.tf").is_file());
    }

    #[test]
    fn extracts_zip_archives() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let dest = utf8_root(&tmp);
        let bytes = zip_bytes(&[("main.tf", "variable \"x\" {}")]);

        extract(ArchiveKind::Zip, &bytes, &dest).expect("extract");
        let text = std::fs::read_to_string(dest.join("main.tf")).expect("read");
        assert!(text.contains("variable"));
    }

    #[test]
    fn corrupt_archives_are_errors() {
        let tmp = tempfile::TempDir::new().expect("temp dir");
        let dest = utf8_root(&tmp);
        assert!(extract(ArchiveKind::Zip, b"not a zip", &dest).is_err());
        assert!(extract(ArchiveKind::TarGz, b"not gzip", &dest).is_err());
    }
}
