//! Conversion of execution results into persisted cell outputs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use super::messages::ExecutionResult;
use crate::model::{CellOutput, Metadata, StreamName};

/// MIME type of rendered figures.
pub const PNG_MIME: &str = "image/png";

/// Outputs for a cell: stdout, stderr, one `image/png` display entry per
/// figure, then an error entry for failed runs. Empty streams are skipped.
pub fn outputs_from_result(result: &ExecutionResult) -> Vec<CellOutput> {
    let mut outputs = Vec::new();

    if !result.stdout.is_empty() {
        outputs.push(CellOutput::Stream {
            name: StreamName::Stdout,
            text: result.stdout.clone(),
        });
    }
    if !result.stderr.is_empty() {
        outputs.push(CellOutput::Stream {
            name: StreamName::Stderr,
            text: result.stderr.clone(),
        });
    }

    for image in &result.images {
        outputs.push(image_output(image));
    }

    if !result.success() {
        outputs.push(error_output(result));
    }

    outputs
}

/// A `display_data` entry carrying base64-encoded PNG bytes.
pub fn image_output(png: &[u8]) -> CellOutput {
    let mut data = serde_json::Map::new();
    data.insert(PNG_MIME.to_string(), Value::String(STANDARD.encode(png)));
    CellOutput::DisplayData {
        data,
        metadata: Metadata::new(),
    }
}

/// Decode the PNG bytes of an `image/png` display entry.
pub fn decode_image(output: &CellOutput) -> Option<Vec<u8>> {
    let CellOutput::DisplayData { data, .. } = output else {
        return None;
    };
    let encoded = data.get(PNG_MIME)?.as_str()?;
    STANDARD.decode(encoded).ok()
}

fn error_output(result: &ExecutionResult) -> CellOutput {
    let trace = result.error.clone().unwrap_or_default();
    let traceback: Vec<String> = trace.lines().map(str::to_string).collect();
    let evalue = traceback.last().cloned().unwrap_or_default();
    CellOutput::Error {
        ename: result
            .error_name
            .clone()
            .unwrap_or_else(|| "Error".to_string()),
        evalue,
        traceback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_result_has_streams_and_images() {
        let result = ExecutionResult {
            stdout: "1\n".into(),
            images: vec![vec![0x89, b'P', b'N', b'G']],
            ..Default::default()
        };

        let outputs = outputs_from_result(&result);
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs[0],
            CellOutput::Stream {
                name: StreamName::Stdout,
                text: "1\n".into()
            }
        );
        assert_eq!(decode_image(&outputs[1]), Some(vec![0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_failed_result_ends_with_error_output() {
        let result = ExecutionResult {
            stderr: "warn\n".into(),
            error: Some("Trace (most recent call last):\n  at line 1, column 6\nNameError: undefined variable `x`".into()),
            error_name: Some("NameError".into()),
            ..Default::default()
        };

        let outputs = outputs_from_result(&result);
        assert_eq!(outputs.len(), 2);
        match &outputs[1] {
            CellOutput::Error {
                ename,
                evalue,
                traceback,
            } => {
                assert_eq!(ename, "NameError");
                assert_eq!(evalue, "NameError: undefined variable `x`");
                assert_eq!(traceback.len(), 3);
            }
            other => panic!("expected error output, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_result_has_no_outputs() {
        assert!(outputs_from_result(&ExecutionResult::default()).is_empty());
    }
}
