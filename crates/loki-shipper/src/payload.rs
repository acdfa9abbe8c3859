// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push payload shaping.
//!
//! A chunk becomes exactly one stream. Body format:
//!
//! ```text
//! {"streams":[{"stream":{"level":"log","resource":"chat"},"values":[["<ns>","<line>"],...]}]}
//! ```

use crate::sanitizer::sanitize;
use crate::tags::{extract_tags, Extraction, TagLabel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const LEVEL_LABEL: &str = "level";
pub const RAW_LABEL: &str = "raw";

/// Which output stream of the supervised process a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Log,
    Error,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Log => "log",
            StreamType::Error => "error",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stream {
    #[serde(rename = "stream")]
    pub labels: BTreeMap<String, String>,
    /// `(nanosecond timestamp, line)` pairs in input order.
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub streams: Vec<Stream>,
}

impl Payload {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn line_count(&self) -> usize {
        self.streams.iter().map(|stream| stream.values.len()).sum()
    }
}

/// Builds the payload for one raw chunk, stamped with the current time.
pub fn build_payload(chunk: &str, stream_type: StreamType) -> Payload {
    let extraction = extract_tags(chunk);
    Payload {
        streams: vec![build_stream(&extraction, stream_type, &unix_nanos())],
    }
}

/// Turns an extraction into a stream whose lines all share `timestamp`.
pub fn build_stream(extraction: &Extraction, stream_type: StreamType, timestamp: &str) -> Stream {
    let values = extraction
        .stripped
        .split('\n')
        .map(|line| (timestamp.to_string(), sanitize(line.trim()).trim().to_string()))
        .collect();

    Stream {
        labels: labels_for(extraction, stream_type),
        values,
    }
}

fn labels_for(extraction: &Extraction, stream_type: StreamType) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LEVEL_LABEL.to_string(), stream_type.as_str().to_string());

    if extraction.is_untagged() {
        labels.insert(RAW_LABEL.to_string(), "true".to_string());
        return labels;
    }
    for label in [TagLabel::Resource, TagLabel::Component] {
        if let Some(value) = extraction.get(label) {
            labels.insert(label.as_str().to_string(), value.to_string());
        }
    }
    labels
}

/// Wall-clock nanoseconds since the epoch as a decimal string.
pub fn unix_nanos() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
        .to_string()
}
