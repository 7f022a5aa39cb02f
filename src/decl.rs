//! Declaration Builder
//!
//! Turns a shader output signature into the stream-output declaration the
//! capture pipeline writes with. Clip-space position, when present, is always
//! captured as a full float4 in the first field.

use tracing::error;

use crate::desc::{SignatureElement, SoDeclarationEntry, StreamOutputDesc, SystemValue};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamDeclaration {
    entries: Vec<SoDeclarationEntry>,
    stride: u32,
    has_position: bool,
}

impl StreamDeclaration {
    pub fn build<'a, I>(signature: I) -> Self
    where
        I: IntoIterator<Item = &'a SignatureElement>,
    {
        let mut entries = Vec::new();
        let mut stride = 0u32;
        let mut position = None;

        for element in signature {
            let mut entry = SoDeclarationEntry {
                stream: 0,
                semantic_name: element.semantic_name.clone(),
                semantic_index: element.semantic_index,
                start_component: 0,
                component_count: element.component_count,
                output_slot: 0,
            };

            if element.system_value == SystemValue::Position {
                position = Some(entries.len());
                entry.component_count = 4;
            }

            stride += u32::from(entry.component_count) * 4;
            entries.push(entry);
        }

        if entries.is_empty() {
            return Self::default();
        }

        if stride == 0 {
            error!("Didn't get valid stride! Setting to 4 bytes");
            stride = 4;
        }

        if let Some(idx) = position.filter(|&idx| idx > 0) {
            let pos = entries.remove(idx);
            entries.insert(0, pos);
        }

        Self {
            entries,
            stride,
            has_position: position.is_some(),
        }
    }

    pub fn entries(&self) -> &[SoDeclarationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes per captured vertex
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Whether the first field is a float4 clip-space position
    pub fn has_position(&self) -> bool {
        self.has_position
    }

    /// Single-buffer stream output with rasterization disabled.
    pub fn stream_output(&self) -> StreamOutputDesc {
        StreamOutputDesc {
            entries: self.entries.clone(),
            buffer_strides: vec![self.stride],
            rasterized_stream: None,
        }
    }
}
