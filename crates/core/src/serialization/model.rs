//! Model documents: an opaque architecture description plus weight arrays.

use serde::{Deserialize, Serialize};

use super::array::{decode_array, encode_array, NdArray};
use super::CorruptPayload;

/// The JSON document exchanged for trained (and submitted) models.
///
/// `architecture` is opaque to this crate; `weights` holds one
/// [`encode_array`] string per weight tensor, in model order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDocument {
    pub architecture: String,
    pub weights: Vec<String>,
}

impl ModelDocument {
    /// Parse a document, rejecting missing keys, wrong types and extra keys.
    pub fn from_json(text: &str) -> Result<Self, CorruptPayload> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> String {
        // Two string fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Package an architecture and its weights into a [`ModelDocument`].
pub fn encode_model(architecture: impl Into<String>, weights: &[NdArray]) -> ModelDocument {
    ModelDocument {
        architecture: architecture.into(),
        weights: weights.iter().map(encode_array).collect(),
    }
}

/// Inverse of [`encode_model`].
pub fn decode_model(document: &ModelDocument) -> Result<(String, Vec<NdArray>), CorruptPayload> {
    let weights = document
        .weights
        .iter()
        .enumerate()
        .map(|(index, encoded)| {
            decode_array(encoded).map_err(|e| CorruptPayload::Weight {
                index,
                source: Box::new(e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((document.architecture.clone(), weights))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::serialization::ArrayData;

    fn weights() -> Vec<NdArray> {
        vec![
            NdArray::new(vec![2, 1], ArrayData::F32(vec![0.5, -1.25])).unwrap(),
            NdArray::new(vec![1], ArrayData::F32(vec![0.125])).unwrap(),
        ]
    }

    #[test]
    fn model_round_trips() {
        let architecture = r#"{"class_name": "Sequential"}"#;
        let document = encode_model(architecture, &weights());

        let parsed = ModelDocument::from_json(&document.to_json()).unwrap();
        let (arch, decoded) = decode_model(&parsed).unwrap();

        assert_eq!(arch, architecture);
        assert_eq!(decoded, weights());
    }

    #[test]
    fn model_without_weights_round_trips() {
        let document = encode_model("", &[]);
        assert_eq!(decode_model(&document).unwrap(), (String::new(), vec![]));
    }

    #[test]
    fn missing_or_extra_keys_are_rejected() {
        assert_matches!(
            ModelDocument::from_json(r#"{"architecture": ""}"#),
            Err(CorruptPayload::Json(_))
        );
        assert_matches!(
            ModelDocument::from_json(r#"{"architecture": "", "weights": [], "extra": 1}"#),
            Err(CorruptPayload::Json(_))
        );
        assert_matches!(
            ModelDocument::from_json(r#"{"architecture": "", "weights": [1]}"#),
            Err(CorruptPayload::Json(_))
        );
        assert_matches!(ModelDocument::from_json("Traceback"), Err(CorruptPayload::Json(_)));
    }

    #[test]
    fn bad_weight_reports_its_index() {
        let mut document = encode_model("arch", &weights());
        document.weights[1] = "%%%".into();

        assert_matches!(
            decode_model(&document),
            Err(CorruptPayload::Weight { index: 1, .. })
        );
    }
}
