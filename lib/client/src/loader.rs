use bytes::Bytes;
use futures_util::future::BoxFuture;
use url::Url;

use cellgrid_core::{
    hash_query_strings, Dataframe, Error, Field, Query, Result, RowIndex,
};
use cellgrid_matrix::{FetchOpts, LoadResult, MatrixLoader};

use crate::codec::decode_matrix_payload;
use crate::http::{do_binary_request, post_form_binary};

/// Combined URL length above which a summarize query switches to POST.
const MAX_SUMMARIZE_URL_LEN: usize = 2000;

/// [`MatrixLoader`] implementation that proxies to the dataset server's
/// REST API. Owned by the base (non-view) matrix instance.
pub struct HttpMatrixLoader {
    client: reqwest::Client,
    base_url: Url,
    n_obs: usize,
    n_var: usize,
}

impl HttpMatrixLoader {
    pub fn new(client: reqwest::Client, base_url: &str, n_obs: usize, n_var: usize) -> Result<Self> {
        // Joins below require the trailing slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            n_obs,
            n_var,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    fn annotation_url(&self, field: Field, query: &Query) -> Result<String> {
        let column = query.expect_simple()?;
        let url = self.endpoint(&format!("annotations/{field}"))?;
        Ok(format!(
            "{url}?annotation-name={}",
            urlencoding::encode(column)
        ))
    }

    fn layout_url(&self, query: &Query) -> Result<String> {
        let column = query.expect_simple()?;
        let url = self.endpoint("layout/obs")?;
        Ok(format!("{url}?layout-name={}", urlencoding::encode(column)))
    }

    async fn expression_request(&self, query: &Query, opts: &FetchOpts) -> Result<Bytes> {
        query.expect_complex()?;
        let suffix = format!(
            "layer={}&logscale={}&scale={}",
            urlencoding::encode(&opts.layer),
            opts.logscale,
            opts.scale
        );
        match query {
            Query::Where(_) => {
                let url = self.endpoint("data/var")?;
                let url = format!("{url}?{}&{suffix}", query.encode());
                do_binary_request(&self.client, &url).await
            }
            Query::Summarize(_) => {
                let url = self.endpoint("summarize/var")?;
                let encoded = query.encode();
                if url.as_str().len() + encoded.len() < MAX_SUMMARIZE_URL_LEN {
                    let url = format!("{url}?{encoded}&{suffix}");
                    do_binary_request(&self.client, &url).await
                } else {
                    let key = hash_query_strings(&[&encoded]);
                    let url = format!("{url}?key={key}");
                    post_form_binary(&self.client, &url, encoded).await
                }
            }
            Query::Simple { .. } => {
                Err(Error::InvalidQuery("expected a complex query".to_string()))
            }
        }
    }

    /// Two logical layout spaces may arrive concatenated in one payload:
    /// the primary projection is cropped to the declared row count, the
    /// auxiliary projection takes the remainder. A missing remainder
    /// resolves to an empty placeholder over the variable count - never an
    /// error.
    fn crop_layout(&self, field: Field, frame: Dataframe) -> Result<Dataframe> {
        match field {
            Field::Emb if frame.n_rows() > self.n_obs => {
                let offsets: Vec<usize> = (0..self.n_obs).collect();
                frame.isubset(&offsets)
            }
            Field::JointEmb => {
                if frame.n_rows() > self.n_obs {
                    let offsets: Vec<usize> = (self.n_obs..frame.n_rows()).collect();
                    let remainder = frame.isubset(&offsets)?;
                    rebase_identity(remainder)
                } else {
                    Ok(Dataframe::empty(RowIndex::identity(self.n_var)))
                }
            }
            _ => Ok(frame),
        }
    }
}

/// Re-key a frame's rows onto a dense identity index.
fn rebase_identity(frame: Dataframe) -> Result<Dataframe> {
    let columns = frame
        .col_names()
        .into_iter()
        .map(|n| Ok((n.to_string(), frame.col(n)?.clone())))
        .collect::<Result<Vec<_>>>()?;
    Dataframe::from_columns(RowIndex::identity(frame.n_rows()), columns)
}

impl MatrixLoader for HttpMatrixLoader {
    fn load<'a>(
        &'a self,
        field: Field,
        query: &'a Query,
        opts: &'a FetchOpts,
    ) -> BoxFuture<'a, Result<LoadResult>> {
        Box::pin(async move {
            let buffer = match field {
                Field::Obs | Field::Var => {
                    let url = self.annotation_url(field, query)?;
                    do_binary_request(&self.client, &url).await?
                }
                Field::X => self.expression_request(query, opts).await?,
                Field::Emb | Field::JointEmb => {
                    let url = self.layout_url(query)?;
                    do_binary_request(&self.client, &url).await?
                }
            };

            let frame = decode_matrix_payload(&buffer)?;
            if frame.is_empty() && field != Field::JointEmb {
                return Err(Error::EmptyResult(query.encode()));
            }
            let frame = self.crop_layout(field, frame)?;
            let columns = frame
                .col_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            Ok(LoadResult { columns, frame })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgrid_core::ColumnData;

    fn loader() -> HttpMatrixLoader {
        HttpMatrixLoader::new(reqwest::Client::new(), "http://localhost:5005/api/v0.2", 3, 2)
            .unwrap()
    }

    fn concatenated_layout() -> Dataframe {
        // 3 obs rows of the primary projection + 2 var rows of the
        // auxiliary one, concatenated on the wire.
        Dataframe::from_columns(
            RowIndex::identity(5),
            vec![
                (
                    "umap_0".to_string(),
                    ColumnData::Float32(vec![0.0, 1.0, 2.0, 10.0, 11.0]),
                ),
                (
                    "umap_1".to_string(),
                    ColumnData::Float32(vec![5.0, 6.0, 7.0, 20.0, 21.0]),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_primary_layout_cropped_to_obs_rows() {
        let cropped = loader()
            .crop_layout(Field::Emb, concatenated_layout())
            .unwrap();
        assert_eq!(cropped.n_rows(), 3);
        assert_eq!(
            cropped.col("umap_0").unwrap(),
            &ColumnData::Float32(vec![0.0, 1.0, 2.0])
        );
    }

    #[test]
    fn test_auxiliary_layout_takes_remainder() {
        let aux = loader()
            .crop_layout(Field::JointEmb, concatenated_layout())
            .unwrap();
        assert_eq!(aux.n_rows(), 2);
        assert_eq!(aux.row_index().labels(), &[0, 1]);
        assert_eq!(
            aux.col("umap_0").unwrap(),
            &ColumnData::Float32(vec![10.0, 11.0])
        );
    }

    #[test]
    fn test_missing_remainder_is_an_empty_placeholder() {
        let primary_only = Dataframe::from_columns(
            RowIndex::identity(3),
            vec![(
                "umap_0".to_string(),
                ColumnData::Float32(vec![0.0, 1.0, 2.0]),
            )],
        )
        .unwrap();
        let aux = loader()
            .crop_layout(Field::JointEmb, primary_only)
            .unwrap();
        assert!(aux.is_empty());
        assert_eq!(aux.n_rows(), 2);
    }

    #[test]
    fn test_annotation_url_shape() {
        let url = loader()
            .annotation_url(Field::Obs, &Query::simple("cell type"))
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:5005/api/v0.2/annotations/obs?annotation-name=cell%20type"
        );
    }
}
