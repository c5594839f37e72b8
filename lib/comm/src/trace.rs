// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collective call trace recorder.
//!
//! Pure accumulation: one [`CollectiveTrace`] per collective call, no
//! coordination with peers. Records are flushed per participant as a JSON
//! array, one file per rank, into a directory derived from the world size
//! and the current date (overridable via configuration). An optional
//! [`TraceSink`] receives the flushed file for upload to an external
//! collector.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{Datelike, Local};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CommConfig;

/// Element type of the tensors a collective carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Byte,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
}

/// Device kind the collective ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

/// One recorded collective call.
#[derive(Debug, Clone, Serialize)]
pub struct CollectiveTrace {
    /// Caller-defined block labels active at record time.
    pub markers: Vec<String>,
    /// Offset from recorder creation, in nanoseconds.
    pub start_time_ns: u64,
    /// Operation name, e.g. `allreduce`.
    pub comms: String,
    /// Opaque identifier of the in-flight operation handle.
    pub req: u64,
    pub seqnum: u64,
    pub world_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_msg_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_msg_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_type: Option<DeviceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_split: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_split: Option<Vec<i64>>,
}

/// Destination for flushed trace files.
pub trait TraceSink: Send + Sync {
    fn upload(&self, path: &Path, dir_name: &str, file_name: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
struct RecorderState {
    records: Vec<CollectiveTrace>,
    markers: Vec<String>,
    root: Option<u32>,
    in_split: Option<Vec<i64>>,
    out_split: Option<Vec<i64>>,
}

/// Accumulates [`CollectiveTrace`] records for one participant.
pub struct CommTraceRecorder {
    epoch: Instant,
    seqnum: AtomicU64,
    state: Mutex<RecorderState>,
    output_dir: Option<PathBuf>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl Default for CommTraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommTraceRecorder {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            seqnum: AtomicU64::new(0),
            state: Mutex::new(RecorderState::default()),
            output_dir: None,
            sink: None,
        }
    }

    /// Honor the configured trace directory override.
    pub fn from_config(config: &CommConfig) -> Self {
        let mut recorder = Self::new();
        recorder.output_dir = config.comms_trace_dir.clone();
        recorder
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Push a block label; attached to every record until popped.
    pub fn set_current_block(&self, name: impl Into<String>) {
        self.state.lock().markers.push(name.into());
    }

    pub fn pop_block(&self) {
        self.state.lock().markers.pop();
    }

    /// Attach a root rank to the next recorded collective (broadcast,
    /// gather, scatter).
    pub fn record_root(&self, root: u32) {
        self.state.lock().root = Some(root);
    }

    /// Attach split-size arrays to the next recorded collective
    /// (all-to-all variants).
    pub fn record_splits(&self, in_split: Vec<i64>, out_split: Vec<i64>) {
        let mut state = self.state.lock();
        state.in_split = Some(in_split);
        state.out_split = Some(out_split);
    }

    /// Record one collective call. Sizes of zero mean the call carried no
    /// tensors and the size/dtype/device fields are omitted from the
    /// record. Pending optional info (root, splits) is consumed.
    #[allow(clippy::too_many_arguments)]
    pub fn record_collective(
        &self,
        comms: impl Into<String>,
        req: u64,
        world_size: u32,
        in_msg_size: u64,
        out_msg_size: u64,
        dtype: DataType,
        dev_type: DeviceKind,
    ) {
        let start_time_ns = self.epoch.elapsed().as_nanos() as u64;
        let seqnum = self.seqnum.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        let sized = in_msg_size > 0 || out_msg_size > 0;
        let record = CollectiveTrace {
            markers: state.markers.clone(),
            start_time_ns,
            comms: comms.into(),
            req,
            seqnum,
            world_size,
            in_msg_size: sized.then_some(in_msg_size),
            out_msg_size: sized.then_some(out_msg_size),
            dtype: sized.then_some(dtype),
            dev_type: sized.then_some(dev_type),
            root: state.root.take(),
            in_split: state.in_split.take(),
            out_split: state.out_split.take(),
        };
        state.records.push(record);
    }

    fn default_dir(world_size: u32) -> PathBuf {
        let now = Local::now();
        PathBuf::from("/tmp").join(format!(
            "comm_trace_np{}_{}_{}_{}",
            world_size,
            now.month(),
            now.day(),
            now.year()
        ))
    }

    /// Write the accumulated records for `rank` as a JSON array and hand
    /// the file to the sink, if any. Returns the written path, or `None`
    /// when nothing was recorded.
    pub fn flush(&self, rank: u32, world_size: u32) -> anyhow::Result<Option<PathBuf>> {
        let records = {
            let state = self.state.lock();
            if state.records.is_empty() {
                return Ok(None);
            }
            state.records.clone()
        };

        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| Self::default_dir(world_size));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create trace directory {}", dir.display()))?;

        let file_name = format!("rank{rank}.json");
        let path = dir.join(&file_name);
        let file = fs::File::create(&path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &records)
            .with_context(|| format!("failed to write trace file {}", path.display()))?;

        tracing::info!(
            rank,
            world_size,
            records = records.len(),
            path = %path.display(),
            "flushed collective trace"
        );

        if let Some(sink) = &self.sink {
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sink.upload(&path, &dir_name, &file_name)?;
        }

        Ok(Some(path))
    }
}
