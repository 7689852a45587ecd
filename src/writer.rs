//! Streaming archive writer
//!
//! Writes a HAR document one entry at a time. Entries go straight to disk
//! as they arrive, so memory use does not grow with the session and the
//! writer never needs to know how many entries will follow.
//!
//! JSON forbids a trailing comma, so the separator between entries is
//! decided late. With [`Separator::Rewind`] every entry is followed by a
//! provisional newline, which the next append overwrites with a comma.
//! [`Separator::Deferred`] keeps the decision in memory and writes the comma
//! in front of the next entry instead, so the file is only ever appended to.
//! Both produce byte-identical archives once closed.

use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::har::{Creator, Entry, HAR_VERSION};

/// Prefix in front of every line of a serialized entry
const ENTRY_PREFIX: &[u8] = b"      ";
const INDENT: &[u8] = b"  ";
const SUFFIX: &str = "\n    ]\n  }\n}\n";

/// A writer shared between concurrent round trips
pub type SharedWriter = Arc<Mutex<HarWriter>>;

/// How separators between entries are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Separator {
    /// Overwrite the previous entry's trailing newline with a comma
    #[default]
    Rewind,
    /// Write the comma before the next entry; append-only
    Deferred,
}

/// Options for opening an archive
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    pub creator: Creator,
    pub separator: Separator,
}

/// Incremental HAR writer that owns the archive file
#[derive(Debug)]
pub struct HarWriter {
    path: PathBuf,
    file: Option<File>,
    entries: usize,
    separator: Separator,
}

impl HarWriter {
    /// Create (or truncate) `path` and write the archive preamble
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, WriterOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;

        file.write_all(preamble(&options.creator)?.as_bytes())?;
        file.sync_data()?;

        debug!(path = %path.display(), separator = ?options.separator, "opened archive");

        Ok(Self {
            path,
            file: Some(file),
            entries: 0,
            separator: options.separator,
        })
    }

    /// Wrap the writer for use from several round trips at once
    pub fn shared(self) -> SharedWriter {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries persisted so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Serialize `entry` into the archive and sync it to disk.
    ///
    /// On failure the entry counts as not written and the file is put back
    /// the way it was, as far as the file system allows.
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let follows = self.entries > 0;
        let retract = follows && self.separator == Separator::Rewind;
        let original_len = file.stream_position()?;

        let written = write_entry(file, entry, follows, self.separator);
        if let Err(err) = written {
            if let Err(restore_err) = restore(file, original_len, retract) {
                warn!(path = %self.path.display(), error = %restore_err, "could not restore archive after failed append");
            }
            return Err(err);
        }

        self.entries += 1;
        Ok(())
    }

    /// Write the closing suffix and release the file.
    pub fn close(&mut self) -> Result<()> {
        let mut file = self.file.take().ok_or(Error::Closed)?;

        if self.entries > 0 && self.separator == Separator::Rewind {
            file.seek(SeekFrom::Current(-1))?;
        }
        file.write_all(SUFFIX.as_bytes())?;
        file.sync_all()?;

        debug!(path = %self.path.display(), entries = self.entries, "closed archive");
        Ok(())
    }
}

impl Drop for HarWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.close() {
                warn!(path = %self.path.display(), error = %err, "archive left unterminated");
            }
        }
    }
}

fn preamble(creator: &Creator) -> Result<String> {
    Ok(format!(
        "{{\n  \"log\": {{\n    \"version\": \"{}\",\n    \"creator\": {{\n      \"name\": {},\n      \"version\": {}\n    }},\n    \"entries\": [",
        HAR_VERSION,
        serde_json::to_string(&creator.name)?,
        serde_json::to_string(&creator.version)?,
    ))
}

fn write_entry(file: &mut File, entry: &Entry, follows: bool, separator: Separator) -> Result<()> {
    if follows {
        if separator == Separator::Rewind {
            file.seek(SeekFrom::Current(-1))?;
        }
        file.write_all(b",")?;
    }

    let mut out = BufWriter::new(&mut *file);
    out.write_all(b"\n")?;
    out.write_all(ENTRY_PREFIX)?;

    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(
        Prefixed {
            inner: &mut out,
            prefix: ENTRY_PREFIX,
        },
        formatter,
    );
    entry.serialize(&mut serializer)?;

    if separator == Separator::Rewind {
        out.write_all(b"\n")?;
    }
    out.flush()?;
    drop(out);

    file.sync_data()?;
    Ok(())
}

fn restore(file: &mut File, original_len: u64, retracted: bool) -> io::Result<()> {
    if retracted {
        // The comma landed on the byte that held the provisional newline
        file.set_len(original_len - 1)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(b"\n")?;
    } else {
        file.set_len(original_len)?;
        file.seek(SeekFrom::End(0))?;
    }
    file.sync_data()
}

/// Writes `prefix` after every newline, shifting a whole document right
struct Prefixed<'a, W: Write> {
    inner: &'a mut W,
    prefix: &'static [u8],
}

impl<W: Write> Write for Prefixed<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.inner.write_all(&rest[..=pos])?;
            self.inner.write_all(self.prefix)?;
            rest = &rest[pos + 1..];
        }
        self.inner.write_all(rest)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Timestamp-based archive name, e.g. `2024-05-01_12-30-00.123456789`
pub fn default_file_name() -> String {
    Utc::now().format("%Y-%m-%d_%H-%M-%S%.9f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::{self, Content, Header, Request, Response};
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(n: usize) -> Entry {
        let headers = vec![Header::new("x-seq", n.to_string())];
        let request = Request {
            method: "GET".to_string(),
            url: format!("https://example.com/{n}"),
            http_version: "HTTP/1.1".to_string(),
            cookies: vec![],
            headers_size: har::headers_size(&headers),
            headers,
            query_string: vec![],
            post_data: None,
            body_size: -1,
            comment: None,
        };
        let response = Response {
            status: 200,
            status_text: "OK".to_string(),
            http_version: "HTTP/1.1".to_string(),
            cookies: vec![],
            headers: vec![],
            content: Content {
                size: 17,
                compression: None,
                mime_type: "text/plain".to_string(),
                text: Some("line one\nline two".to_string()),
                encoding: None,
            },
            redirect_url: String::new(),
            headers_size: 2,
            body_size: 17,
            comment: None,
        };
        Entry::new(Utc::now(), Duration::from_millis(n as u64), request, response)
    }

    fn write_archive(path: &Path, separator: Separator, count: usize) -> String {
        let options = WriterOptions {
            separator,
            ..WriterOptions::default()
        };
        let mut writer = HarWriter::with_options(path, options).unwrap();
        for n in 0..count {
            writer.append(&entry(n)).unwrap();
        }
        writer.close().unwrap();
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.har");
        let content = write_archive(&path, Separator::Rewind, 0);

        let har = har::parse_har(&content).unwrap();
        assert_eq!(har.log.version, "1.2");
        assert_eq!(har.log.creator, Creator::default());
        assert!(har.log.entries.is_empty());
        assert!(content.ends_with("\"entries\": [\n    ]\n  }\n}\n"));
    }

    #[test]
    fn test_entries_keep_append_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("three.har");
        let content = write_archive(&path, Separator::Rewind, 3);

        let har = har::parse_har(&content).unwrap();
        let urls: Vec<_> = har.log.entries.iter().map(|e| e.request.url.as_str()).collect();
        assert_eq!(
            urls,
            ["https://example.com/0", "https://example.com/1", "https://example.com/2"]
        );
        assert!(!content.contains(",\n    ]"));
    }

    #[test]
    fn test_entries_are_indented_under_the_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indent.har");
        let content = write_archive(&path, Separator::Rewind, 2);

        assert!(content.contains("\"entries\": [\n      {\n        \"startedDateTime\""));
        assert!(content.contains("\n      },\n      {\n"));
        // Newlines inside strings are escaped, not prefixed
        assert!(content.contains(r#""text": "line one\nline two""#));
    }

    #[test]
    fn test_separator_strategies_agree() {
        let dir = TempDir::new().unwrap();
        let options = |separator| WriterOptions {
            separator,
            ..WriterOptions::default()
        };
        let rewind_path = dir.path().join("rewind.har");
        let deferred_path = dir.path().join("deferred.har");

        let mut rewind = HarWriter::with_options(&rewind_path, options(Separator::Rewind)).unwrap();
        let mut deferred =
            HarWriter::with_options(&deferred_path, options(Separator::Deferred)).unwrap();
        for n in 0..4 {
            let e = entry(n);
            rewind.append(&e).unwrap();
            deferred.append(&e).unwrap();
        }
        rewind.close().unwrap();
        deferred.close().unwrap();

        assert_eq!(
            std::fs::read(&rewind_path).unwrap(),
            std::fs::read(&deferred_path).unwrap()
        );
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = HarWriter::open(dir.path().join("closed.har")).unwrap();
        writer.append(&entry(0)).unwrap();
        writer.close().unwrap();

        assert!(writer.is_closed());
        assert!(matches!(writer.append(&entry(1)), Err(Error::Closed)));
        assert!(matches!(writer.close(), Err(Error::Closed)));
        assert_eq!(writer.entries(), 1);
    }

    #[test]
    fn test_failed_append_keeps_archive_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readonly.har");
        let mut writer = HarWriter::open(&path).unwrap();
        writer.append(&entry(0)).unwrap();
        let before = std::fs::read(&path).unwrap();

        // Swap in a handle that cannot write
        let mut readonly = File::open(&path).unwrap();
        readonly.seek(SeekFrom::End(0)).unwrap();
        writer.file = Some(readonly);

        assert!(matches!(writer.append(&entry(1)), Err(Error::Io(_))));
        assert_eq!(writer.entries(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);

        let mut writable = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writable.seek(SeekFrom::End(0)).unwrap();
        writer.file = Some(writable);
        writer.close().unwrap();

        let har = har::load_har(&path).unwrap();
        assert_eq!(har.log.entries.len(), 1);
    }

    #[test]
    fn test_restore_undoes_partial_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.har");
        let mut writer = HarWriter::open(&path).unwrap();
        writer.append(&entry(0)).unwrap();
        let before = std::fs::read(&path).unwrap();

        let file = writer.file.as_mut().unwrap();
        let original_len = file.stream_position().unwrap();
        // A comma over the provisional newline and half an entry
        file.seek(SeekFrom::Current(-1)).unwrap();
        file.write_all(b",\n      {\n        \"startedDa").unwrap();

        restore(file, original_len, true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);

        writer.append(&entry(1)).unwrap();
        writer.close().unwrap();
        assert_eq!(har::load_har(&path).unwrap().log.entries.len(), 2);
    }

    #[test]
    fn test_drop_finalizes_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.har");
        {
            let mut writer = HarWriter::open(&path).unwrap();
            writer.append(&entry(0)).unwrap();
        }

        let har = har::load_har(&path).unwrap();
        assert_eq!(har.log.entries.len(), 1);
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = HarWriter::open(dir.path().join("missing").join("out.har"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_creator_is_escaped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("creator.har");
        let creator = Creator {
            name: "my \"tool\"".to_string(),
            version: "2.0".to_string(),
            comment: None,
        };
        let mut writer = HarWriter::with_options(
            &path,
            WriterOptions {
                creator: creator.clone(),
                separator: Separator::Rewind,
            },
        )
        .unwrap();
        writer.close().unwrap();

        assert_eq!(har::load_har(&path).unwrap().log.creator, creator);
    }

    #[test]
    fn test_default_file_name_shape() {
        let name = default_file_name();
        assert_eq!(name.len(), "2024-05-01_12-30-00.123456789".len());
        assert_eq!(&name[10..11], "_");
        assert!(!name.contains(':'));
    }
}
