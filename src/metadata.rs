use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_EXIFTOOL: &str = "exiftool";

pub const SOURCE_FILE: &str = "SourceFile";
pub const FILE_NAME: &str = "File:FileName";
pub const FILE_DIRECTORY: &str = "File:Directory";
pub const FILE_TYPE_EXTENSION: &str = "File:FileTypeExtension";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata tool {} not found", .tool.display())]
    ToolNotFound { tool: PathBuf },

    #[error("failed to run metadata tool {}: {source}", .tool.display())]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("metadata tool {} exited with {status}: {stderr}", .tool.display())]
    ToolFailed {
        tool: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("could not parse metadata tool output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One file's tags, keyed `Group:Tag` in the order the tool emitted them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    fields: Map<String, Value>,
}

impl MetadataRecord {
    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(value_text)
    }

    pub fn source_file(&self) -> Option<String> {
        self.get(SOURCE_FILE)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Collect every value whose key has a `:`-separated segment equal to `field`.
///
/// Matching is exact and case-sensitive against any segment, so `Title` hits
/// both `QuickTime:Title` and `XMP:Title:Extra`. Values keep record order.
pub fn find_field(metadata: &MetadataRecord, field: &str) -> Vec<String> {
    debug!(field, keys = metadata.len(), "searching metadata");

    let found: Vec<String> = metadata
        .fields
        .iter()
        .filter(|(key, _)| key.trim().split(':').any(|segment| segment == field))
        .map(|(key, value)| {
            debug!(key = %key, "field matches");
            value_text(value)
        })
        .collect();

    debug!(field, matches = found.len(), "metadata search done");
    found
}

pub trait MetadataSource {
    /// Check the tool can run at all. Returns its version string.
    fn probe(&self) -> Result<String, MetadataError>;

    /// One record per readable file, in the order the tool reports them.
    fn read_batch(&self, files: &[PathBuf]) -> Result<Vec<MetadataRecord>, MetadataError>;
}

#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn spawn_error(&self, err: io::Error) -> MetadataError {
        if err.kind() == io::ErrorKind::NotFound {
            MetadataError::ToolNotFound {
                tool: self.program.clone(),
            }
        } else {
            MetadataError::Spawn {
                tool: self.program.clone(),
                source: err,
            }
        }
    }
}

impl MetadataSource for ExifTool {
    fn probe(&self) -> Result<String, MetadataError> {
        let out = Command::new(&self.program)
            .arg("-ver")
            .output()
            .map_err(|e| self.spawn_error(e))?;
        if !out.status.success() {
            return Err(MetadataError::ToolFailed {
                tool: self.program.clone(),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn read_batch(&self, files: &[PathBuf]) -> Result<Vec<MetadataRecord>, MetadataError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        // File names go through an argument file on stdin, so batch size is
        // not bounded by ARG_MAX. -G: group-qualified keys, -n: raw values.
        let mut child = Command::new(&self.program)
            .arg("-@")
            .arg("-")
            .arg("-json")
            .arg("-G")
            .arg("-n")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let arg_file = build_arg_file(files);
        let mut stdin = child.stdin.take().ok_or_else(|| MetadataError::Spawn {
            tool: self.program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured"),
        })?;
        let feeder = thread::spawn(move || stdin.write_all(arg_file.as_bytes()));

        let out = child.wait_with_output().map_err(|e| self.spawn_error(e))?;
        match feeder.join() {
            Ok(Ok(())) => {}
            // The tool exiting early closes the pipe; its status tells the story.
            Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => {
                return Err(MetadataError::Spawn {
                    tool: self.program.clone(),
                    source: err,
                })
            }
            Err(_) => {
                return Err(MetadataError::Spawn {
                    tool: self.program.clone(),
                    source: io::Error::other("argument writer panicked"),
                })
            }
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!(tool = %self.program.display(), "{}", line.trim());
        }

        // exiftool exits non-zero when any single file fails, but still
        // reports the others on stdout.
        let stdout = String::from_utf8_lossy(&out.stdout);
        if stdout.trim().is_empty() {
            if out.status.success() {
                return Ok(Vec::new());
            }
            return Err(MetadataError::ToolFailed {
                tool: self.program.clone(),
                status: out.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(serde_json::from_str(&stdout)?)
    }
}

/// One argument per line, as exiftool reads `-@` files.
///
/// Names exiftool would take for an option or a comment (leading `-` or `#`)
/// or trim (leading whitespace) get a `./` prefix.
pub fn arg_file_line(path: &Path) -> String {
    let text = path.to_string_lossy();
    match text.chars().next() {
        Some('-' | '#') => format!("./{text}"),
        Some(c) if c.is_whitespace() => format!("./{text}"),
        _ => text.into_owned(),
    }
}

fn build_arg_file(files: &[PathBuf]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&arg_file_line(file));
        out.push('\n');
    }
    out
}
