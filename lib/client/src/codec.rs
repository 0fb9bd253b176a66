use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cellgrid_core::{ColumnData, Dataframe, Error, Result, RowIndex};

/// Binary columnar payload: the wire shape of every data endpoint.
///
/// When `labels` is absent the rows are implicitly 0..n (identity index).
#[derive(Debug, Serialize, Deserialize)]
pub struct MatrixPayload {
    #[serde(default)]
    pub labels: Option<Vec<i32>>,
    pub columns: Vec<(String, ColumnData)>,
}

/// Decode a binary payload into a columnar container.
///
/// An empty column set decodes to an empty frame; whether that is an error
/// is the caller's decision (the auxiliary embedding projection may
/// legitimately be empty).
pub fn decode_matrix_payload(buffer: &Bytes) -> Result<Dataframe> {
    let payload: MatrixPayload =
        bincode::deserialize(buffer).map_err(|e| Error::Decode(e.to_string()))?;

    let n_rows = payload
        .columns
        .first()
        .map(|(_, c)| c.len())
        .unwrap_or(0);
    let row_index = match payload.labels {
        Some(labels) => RowIndex::from_labels(labels)?,
        None => RowIndex::identity(n_rows),
    };
    Dataframe::from_columns(row_index, payload.columns)
}

/// Encode a frame back into the wire shape. Used by tests and tooling.
pub fn encode_matrix_payload(frame: &Dataframe) -> Result<Bytes> {
    let payload = MatrixPayload {
        labels: Some(frame.row_index().labels().to_vec()),
        columns: frame
            .col_names()
            .into_iter()
            .map(|n| Ok((n.to_string(), frame.col(n)?.clone())))
            .collect::<Result<_>>()?,
    };
    let bytes = bincode::serialize(&payload).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_identity_index() {
        let payload = MatrixPayload {
            labels: None,
            columns: vec![("n".to_string(), ColumnData::Float32(vec![1.0, 2.0]))],
        };
        let bytes = Bytes::from(bincode::serialize(&payload).unwrap());
        let frame = decode_matrix_payload(&bytes).unwrap();
        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.row_index().labels(), &[0, 1]);
    }

    #[test]
    fn test_round_trip_preserves_labels() {
        let frame = Dataframe::from_columns(
            RowIndex::from_labels(vec![4, 7]).unwrap(),
            vec![(
                "cell_type".to_string(),
                ColumnData::Categorical(vec!["t".into(), "b".into()]),
            )],
        )
        .unwrap();
        let bytes = encode_matrix_payload(&frame).unwrap();
        let decoded = decode_matrix_payload(&bytes).unwrap();
        assert_eq!(decoded.row_index().labels(), &[4, 7]);
        assert_eq!(decoded.col("cell_type").unwrap(), frame.col("cell_type").unwrap());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = decode_matrix_payload(&Bytes::from_static(b"not bincode")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
