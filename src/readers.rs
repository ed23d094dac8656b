//! Line input for the command-line driver: files (gzip detected by magic
//! bytes) or stdin.

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::{Arc, Mutex, MutexGuard};

const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

pub type LineInput = Box<dyn BufRead + Send>;

/// Open `path`, transparently decompressing gzip content
pub fn open_file(path: &str) -> Result<LineInput> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path))?;

    let mut head = [0u8; 3];
    let n = read_head(&mut file, &mut head)
        .with_context(|| format!("Failed to read {}", path))?;
    let chained = io::Cursor::new(head[..n].to_vec()).chain(file);

    if n == GZIP_MAGIC.len() && head == GZIP_MAGIC {
        tracing::debug!(path, "reading gzip input");
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(chained))))
    } else {
        Ok(Box::new(BufReader::new(chained)))
    }
}

/// Read up to `buf.len()` bytes, stopping early only at end of file
fn read_head(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open every file up front so a missing file fails before the pipeline
/// starts. An empty list (or `-`) reads stdin.
pub fn open_inputs(files: &[String]) -> Result<Vec<(String, LineInput)>> {
    if files.is_empty() {
        return Ok(vec![("<stdin>".to_string(), stdin_input())]);
    }

    files
        .iter()
        .map(|path| {
            let input = if path == "-" {
                stdin_input()
            } else {
                open_file(path)?
            };
            Ok((path.clone(), input))
        })
        .collect()
}

fn stdin_input() -> LineInput {
    Box::new(BufReader::new(io::stdin()))
}

/// First read error hit by an [`InputLines`]. Shared with the caller because
/// the lines are consumed on the pipeline's source thread.
#[derive(Debug, Clone, Default)]
pub struct ReadFailure(Arc<Mutex<Option<anyhow::Error>>>);

impl ReadFailure {
    fn lock(&self) -> MutexGuard<'_, Option<anyhow::Error>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, err: anyhow::Error) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// The recorded error, if any; later calls return `None`
    pub fn take(&self) -> Option<anyhow::Error> {
        self.lock().take()
    }
}

/// Lines of every input in turn, without line terminators. Invalid UTF-8 is
/// replaced. A read error ends that input, is recorded in the
/// [`ReadFailure`], and reading moves on to the next input.
pub struct InputLines {
    inputs: VecDeque<(String, LineInput)>,
    buf: Vec<u8>,
    failure: ReadFailure,
}

impl InputLines {
    pub fn new(inputs: Vec<(String, LineInput)>) -> Self {
        Self {
            inputs: inputs.into(),
            buf: Vec::new(),
            failure: ReadFailure::default(),
        }
    }

    /// Handle to the first read error, to check once the lines are consumed
    pub fn failure(&self) -> ReadFailure {
        self.failure.clone()
    }
}

impl Iterator for InputLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let (name, reader) = self.inputs.front_mut()?;
            self.buf.clear();

            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.inputs.pop_front();
                }
                Ok(_) => {
                    if self.buf.ends_with(b"\n") {
                        self.buf.pop();
                        if self.buf.ends_with(b"\r") {
                            self.buf.pop();
                        }
                    }
                    return Some(String::from_utf8_lossy(&self.buf).into_owned());
                }
                Err(e) => {
                    tracing::error!(
                        input = %name,
                        error = %e,
                        "read failed, skipping rest of input"
                    );
                    self.failure
                        .record(anyhow!(e).context(format!("Failed to read {}", name)));
                    self.inputs.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lines_of(inputs: Vec<(String, LineInput)>) -> Vec<String> {
        InputLines::new(inputs).collect()
    }

    #[test]
    fn test_plain_file_lines() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "one\r\ntwo\n\nthree").unwrap();
        file.flush().unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let inputs = open_inputs(&[path]).unwrap();
        assert_eq!(lines_of(inputs), vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_gzip_file_lines() {
        let mut file = NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"alpha\nbeta\n").unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let input = open_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            lines_of(vec![("gz".to_string(), input)]),
            vec!["alpha", "beta"]
        );
    }

    #[test]
    fn test_tiny_and_empty_files() {
        let mut tiny = NamedTempFile::new().unwrap();
        write!(tiny, "x").unwrap();
        tiny.flush().unwrap();
        let empty = NamedTempFile::new().unwrap();

        let inputs = open_inputs(&[
            empty.path().to_str().unwrap().to_string(),
            tiny.path().to_str().unwrap().to_string(),
        ])
        .unwrap();
        assert_eq!(lines_of(inputs), vec!["x"]);
    }

    #[test]
    fn test_missing_file() {
        let err = open_inputs(&["/nonexistent/input.txt".to_string()]).err().unwrap();
        assert!(err.to_string().contains("Failed to open"));
    }

    #[test]
    fn test_truncated_gzip_is_reported() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for n in 0..20_000 {
            writeln!(encoder, "line {}", n).unwrap();
        }
        let compressed = encoder.finish().unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&compressed[..compressed.len() / 2]).unwrap();
        file.flush().unwrap();
        let mut healthy = NamedTempFile::new().unwrap();
        write!(healthy, "after").unwrap();
        healthy.flush().unwrap();

        let inputs = open_inputs(&[
            file.path().to_str().unwrap().to_string(),
            healthy.path().to_str().unwrap().to_string(),
        ])
        .unwrap();
        let lines = InputLines::new(inputs);
        let failure = lines.failure();
        let lines: Vec<String> = lines.collect();

        assert!(lines.len() < 20_001);
        assert_eq!(lines.last().map(String::as_str), Some("after"));
        let err = failure.take().expect("truncated input should be reported");
        assert!(err.to_string().starts_with("Failed to read"));
        assert!(failure.take().is_none());
    }

    #[test]
    fn test_clean_input_has_no_failure() {
        let input: LineInput = Box::new(io::Cursor::new(b"a\nb\n".to_vec()));
        let lines = InputLines::new(vec![("bytes".to_string(), input)]);
        let failure = lines.failure();
        assert_eq!(lines.count(), 2);
        assert!(failure.take().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let input: LineInput = Box::new(io::Cursor::new(b"ok\n\xFFbad\n".to_vec()));
        assert_eq!(
            lines_of(vec![("bytes".to_string(), input)]),
            vec!["ok".to_string(), "\u{FFFD}bad".to_string()]
        );
    }
}
