//! Text codec for cluster partitions.
//!
//! A partition is stored as four artifacts (ops, inputs, outputs, intervals).
//! Each artifact starts with a header line `#<kind> v1 <count>` followed by
//! exactly `count` newline-terminated records, one per cluster, in cluster
//! order. Name records hold length-prefixed entries `<byte_len>:<name>`
//! separated by one space, so names may contain spaces, colons or newlines.
//! Interval records are `<start> <end>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const FORMAT_VERSION: &str = "v1";

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("{kind} artifact: missing or malformed header")]
    BadHeader { kind: ArtifactKind },
    #[error("expected {expected} artifact, found '{found}'")]
    KindMismatch { expected: ArtifactKind, found: String },
    #[error("{kind} artifact: unsupported version '{version}'")]
    UnsupportedVersion { kind: ArtifactKind, version: String },
    #[error("{kind} artifact: header declares {declared} clusters but {actual} records follow")]
    CountMismatch {
        kind: ArtifactKind,
        declared: usize,
        actual: usize,
    },
    #[error("{kind} artifact, cluster {cluster}: {reason}")]
    BadEntry {
        kind: ArtifactKind,
        cluster: usize,
        reason: String,
    },
    #[error("cluster {cluster}: interval start {start} is after end {end}")]
    InvalidInterval { cluster: usize, start: i64, end: i64 },
    #[error("artifacts are misaligned: ops={ops}, inputs={inputs}, outputs={outputs}, intervals={intervals}")]
    Misaligned {
        ops: usize,
        inputs: usize,
        outputs: usize,
        intervals: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Ops,
    Inputs,
    Outputs,
    Intervals,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Ops,
        ArtifactKind::Inputs,
        ArtifactKind::Outputs,
        ArtifactKind::Intervals,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ArtifactKind::Ops => "ops",
            ArtifactKind::Inputs => "inputs",
            ArtifactKind::Outputs => "outputs",
            ArtifactKind::Intervals => "intervals",
        }
    }

    /// File name used by the exporter for this artifact.
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Ops => "clusters_ops.txt",
            ArtifactKind::Inputs => "clusters_inputs.txt",
            ArtifactKind::Outputs => "clusters_outputs.txt",
            ArtifactKind::Intervals => "clusters_intervals.txt",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cluster {
    pub ops: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub interval: (i64, i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSet(pub Vec<Cluster>);

/// The four serialized artifacts of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedClusters {
    pub ops: String,
    pub inputs: String,
    pub outputs: String,
    pub intervals: String,
}

impl EncodedClusters {
    pub fn get(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Ops => &self.ops,
            ArtifactKind::Inputs => &self.inputs,
            ArtifactKind::Outputs => &self.outputs,
            ArtifactKind::Intervals => &self.intervals,
        }
    }
}

impl ClusterSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.0.iter()
    }

    pub fn encode(&self) -> EncodedClusters {
        EncodedClusters {
            ops: encode_names(ArtifactKind::Ops, self.iter().map(|c| &c.ops)),
            inputs: encode_names(ArtifactKind::Inputs, self.iter().map(|c| &c.inputs)),
            outputs: encode_names(ArtifactKind::Outputs, self.iter().map(|c| &c.outputs)),
            intervals: encode_intervals(self.iter().map(|c| c.interval)),
        }
    }

    pub fn decode(encoded: &EncodedClusters) -> Result<Self, CodecError> {
        let ops = decode_names(ArtifactKind::Ops, &encoded.ops)?;
        let inputs = decode_names(ArtifactKind::Inputs, &encoded.inputs)?;
        let outputs = decode_names(ArtifactKind::Outputs, &encoded.outputs)?;
        let intervals = decode_intervals(&encoded.intervals)?;

        if ops.len() != inputs.len() || ops.len() != outputs.len() || ops.len() != intervals.len()
        {
            return Err(CodecError::Misaligned {
                ops: ops.len(),
                inputs: inputs.len(),
                outputs: outputs.len(),
                intervals: intervals.len(),
            });
        }

        let clusters = ops
            .into_iter()
            .zip(inputs)
            .zip(outputs)
            .zip(intervals)
            .map(|(((ops, inputs), outputs), interval)| Cluster {
                ops,
                inputs,
                outputs,
                interval,
            })
            .collect();
        Ok(ClusterSet(clusters))
    }
}

fn header(kind: ArtifactKind, count: usize) -> String {
    format!("#{} {} {}\n", kind.tag(), FORMAT_VERSION, count)
}

fn encode_names<'a>(
    kind: ArtifactKind,
    rows: impl ExactSizeIterator<Item = &'a Vec<String>>,
) -> String {
    let mut out = header(kind, rows.len());
    for names in rows {
        let line = names
            .iter()
            .map(|name| format!("{}:{}", name.len(), name))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn encode_intervals(rows: impl ExactSizeIterator<Item = (i64, i64)>) -> String {
    let mut out = header(ArtifactKind::Intervals, rows.len());
    for (start, end) in rows {
        out.push_str(&format!("{} {}\n", start, end));
    }
    out
}

/// Checks the header line and returns the declared cluster count and the body.
fn split_header(kind: ArtifactKind, text: &str) -> Result<(usize, &str), CodecError> {
    let (head, body) = text
        .split_once('\n')
        .ok_or(CodecError::BadHeader { kind })?;
    let mut fields = head
        .strip_prefix('#')
        .ok_or(CodecError::BadHeader { kind })?
        .split(' ');
    let (Some(found), Some(version), Some(count), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(CodecError::BadHeader { kind });
    };
    if found != kind.tag() {
        return Err(CodecError::KindMismatch {
            expected: kind,
            found: found.to_string(),
        });
    }
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            kind,
            version: version.to_string(),
        });
    }
    let declared: usize = count.parse().map_err(|_| CodecError::BadHeader { kind })?;
    Ok((declared, body))
}

fn check_count(kind: ArtifactKind, declared: usize, actual: usize) -> Result<(), CodecError> {
    if declared != actual {
        return Err(CodecError::CountMismatch {
            kind,
            declared,
            actual,
        });
    }
    Ok(())
}

// Names are read by length, so a name may itself contain a newline.
fn decode_names(kind: ArtifactKind, text: &str) -> Result<Vec<Vec<String>>, CodecError> {
    let (declared, mut rest) = split_header(kind, text)?;
    let mut rows = Vec::new();
    while !rest.is_empty() {
        let cluster = rows.len();
        let (names, remaining) = decode_name_record(rest).map_err(|reason| {
            CodecError::BadEntry {
                kind,
                cluster,
                reason,
            }
        })?;
        rows.push(names);
        rest = remaining;
    }
    check_count(kind, declared, rows.len())?;
    Ok(rows)
}

/// Parses one newline-terminated record and returns it with the remaining input.
fn decode_name_record(input: &str) -> Result<(Vec<String>, &str), String> {
    let mut names = Vec::new();
    let mut rest = input;
    loop {
        if let Some(after) = rest.strip_prefix('\n') {
            return Ok((names, after));
        }
        if rest.is_empty() {
            return Err("record is not newline-terminated".to_string());
        }
        if !names.is_empty() {
            rest = rest
                .strip_prefix(' ')
                .ok_or_else(|| "entries must be separated by a single space".to_string())?;
        }
        let colon = rest
            .find(':')
            .ok_or_else(|| "missing length prefix".to_string())?;
        let len: usize = rest[..colon]
            .parse()
            .map_err(|_| format!("invalid length prefix '{}'", rest[..colon].escape_debug()))?;
        let start = colon + 1;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= rest.len())
            .ok_or_else(|| format!("entry of {} bytes is truncated", len))?;
        let name = rest
            .get(start..end)
            .ok_or_else(|| "entry boundary splits a UTF-8 character".to_string())?;
        names.push(name.to_string());
        rest = &rest[end..];
    }
}

fn decode_intervals(text: &str) -> Result<Vec<(i64, i64)>, CodecError> {
    let kind = ArtifactKind::Intervals;
    let (declared, body) = split_header(kind, text)?;
    let lines: Vec<&str> = match body.strip_suffix('\n') {
        Some(body) => body.split('\n').collect(),
        None if body.is_empty() => Vec::new(),
        None => {
            return Err(CodecError::BadEntry {
                kind,
                cluster: body.split('\n').count() - 1,
                reason: "record is not newline-terminated".to_string(),
            });
        }
    };
    check_count(kind, declared, lines.len())?;
    lines
        .iter()
        .enumerate()
        .map(|(cluster, line)| {
            let bad = |reason: &str| CodecError::BadEntry {
                kind,
                cluster,
                reason: reason.to_string(),
            };
            let mut fields = line.split(' ');
            let (Some(start), Some(end), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(bad("expected '<start> <end>'"));
            };
            let start: i64 = start.parse().map_err(|_| bad("invalid interval start"))?;
            let end: i64 = end.parse().map_err(|_| bad("invalid interval end"))?;
            if start > end {
                return Err(CodecError::InvalidInterval {
                    cluster,
                    start,
                    end,
                });
            }
            Ok((start, end))
        })
        .collect()
}
