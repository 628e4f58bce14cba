// easy-probe/Crates/easy-probe/src/streaming/plan.rs

//! Turning a window into byte ranges of the component arrays.

use crate::dataset::{DatasetMetadata, ShComponent, BYTES_PER_GROUP};
use crate::streaming::region::StreamingWindow;

/// One contiguous run of probes to copy from a file into a staging buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StreamingRequest {
    pub file_offset: u64,
    pub length: usize,
    pub buffer_offset: usize,
}

impl StreamingRequest {
    pub fn buffer_end(&self) -> usize {
        self.buffer_offset + self.length
    }
}

/// One request per row of probes in the valid part of `window`, relative to
/// the start of a component array.
///
/// Rows land at the origin of the destination volume, which has the size of
/// the whole window, so rows keep the full window's row and slice strides.
pub fn line_requests(metadata: &DatasetMetadata, window: &StreamingWindow) -> Vec<StreamingRequest> {
    if window.is_empty() {
        return vec![];
    }

    let counts = metadata.probe_count_per_volume_axis.as_uvec3();
    let slice = counts.x as u64 * counts.y as u64;
    let step = (metadata.probe_count_per_cell_axis - 1).max(0) as u64;
    let cell_offset = ((window.valid_min - metadata.cell_min) / metadata.cell_size)
        .max(glam::IVec3::ZERO)
        .as_uvec3();
    let probe_start = cell_offset.x as u64 * step
        + cell_offset.y as u64 * step * counts.x as u64
        + cell_offset.z as u64 * step * slice;

    let valid = window.valid_probe_count(metadata).as_uvec3();
    let buffer = window.buffer_size(metadata).as_uvec3();
    let group = BYTES_PER_GROUP as u64;

    let mut requests = Vec::with_capacity(valid.y as usize * valid.z as usize);
    for z in 0..valid.z as u64 {
        for y in 0..valid.y as u64 {
            let probe = probe_start + z * slice + y * counts.x as u64;
            let buffer_probe = z * buffer.x as u64 * buffer.y as u64 + y * buffer.x as u64;
            requests.push(StreamingRequest {
                file_offset: probe * group,
                length: valid.x as usize * BYTES_PER_GROUP,
                buffer_offset: (buffer_probe * group) as usize,
            });
        }
    }
    requests
}

/// Moves relative requests onto `component`'s array within its file.
pub fn component_requests(
    metadata: &DatasetMetadata,
    component: ShComponent,
    lines: &[StreamingRequest],
) -> Vec<StreamingRequest> {
    let base = metadata.component_file_offset(component);
    lines
        .iter()
        .map(|request| StreamingRequest {
            file_offset: base + request.file_offset,
            ..*request
        })
        .collect()
}

/// A single request reading all of `component`.
pub fn whole_component_request(
    metadata: &DatasetMetadata,
    component: ShComponent,
) -> StreamingRequest {
    StreamingRequest {
        file_offset: metadata.component_file_offset(component),
        length: metadata.component_byte_len() as usize,
        buffer_offset: 0,
    }
}
