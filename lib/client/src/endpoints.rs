use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;

use cellgrid_core::Result;

use crate::http::{
    abortable, do_binary_request, do_json_request, put_json, put_json_binary, AbortHandle,
};

/// Whole-dataset saves may legitimately run very long.
const SAVE_TIMEOUT: Duration = Duration::from_secs(6000);

/// Typed client for the server's request/response endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    #[inline]
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// GET a JSON document; used throughout the startup handshake.
    pub async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        do_json_request(&self.client, &self.url(path)).await
    }

    // ---- saved comparisons, sets, gene sets --------------------------

    pub async fn rename_diffexp(&self, old_name: &str, new_name: &str) -> Result<()> {
        let body = json!({ "oldName": old_name, "newName": new_name });
        put_json::<serde_json::Value>(&self.client, &self.url("renameDiffExp"), &body).await?;
        Ok(())
    }

    pub async fn delete_diffexp(&self, name: &str) -> Result<()> {
        // Saved comparisons are keyed on the name before the group marker.
        let name = name.split("//;;//").next().unwrap_or(name);
        let body = json!({ "name": name });
        put_json::<serde_json::Value>(&self.client, &self.url("deleteDiffExp"), &body).await?;
        Ok(())
    }

    pub async fn rename_set(&self, old_name: &str, new_name: &str) -> Result<()> {
        let body = json!({ "oldName": old_name, "newName": new_name });
        put_json::<serde_json::Value>(&self.client, &self.url("renameSet"), &body).await?;
        Ok(())
    }

    pub async fn delete_set(&self, name: &str) -> Result<()> {
        let body = json!({ "name": name });
        put_json::<serde_json::Value>(&self.client, &self.url("deleteSet"), &body).await?;
        Ok(())
    }

    pub async fn rename_gene_set(
        &self,
        group: &str,
        new_group: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        let body = json!({
            "set": group,
            "newSet": new_group,
            "oldName": old_name,
            "newName": new_name,
        });
        put_json::<serde_json::Value>(&self.client, &self.url("renameGeneSet"), &body).await?;
        Ok(())
    }

    pub async fn delete_gene_set(&self, group: &str, name: &str) -> Result<()> {
        let body = json!({ "set": group, "name": name });
        put_json::<serde_json::Value>(&self.client, &self.url("deleteGeneSet"), &body).await?;
        Ok(())
    }

    // ---- gene metadata ------------------------------------------------

    pub async fn gene_info(
        &self,
        gene: &str,
        var_metadata: &str,
        layout: &str,
    ) -> Result<serde_json::Value> {
        let url = format!(
            "{}?gene={}&varM={}&embName={}",
            self.url("geneInfo"),
            urlencoding::encode(gene),
            urlencoding::encode(var_metadata),
            urlencoding::encode(layout)
        );
        let response: serde_json::Value = do_json_request(&self.client, &url).await?;
        Ok(response.get("response").cloned().unwrap_or(serde_json::Value::Null))
    }

    pub async fn gene_info_bulk(
        &self,
        gene_set: &[String],
        var_metadata: &str,
        layout: &str,
    ) -> Result<serde_json::Value> {
        let body = json!({
            "geneSet": gene_set,
            "varMetadata": var_metadata,
            "embName": layout,
        });
        let response: serde_json::Value =
            put_json(&self.client, &self.url("geneInfoBulk"), &body).await?;
        Ok(response.get("response").cloned().unwrap_or(serde_json::Value::Null))
    }

    pub async fn diffexp_pops(&self, name: &str, pop: &str) -> Result<serde_json::Value> {
        let url = format!(
            "{}?name={}&pop={}",
            self.url("diffExpPops"),
            urlencoding::encode(name),
            urlencoding::encode(pop)
        );
        do_json_request(&self.client, &url).await
    }

    pub async fn admin_restart(&self) -> Result<()> {
        do_binary_request(&self.client, &self.url("adminRestart")).await?;
        Ok(())
    }

    // ---- exports ------------------------------------------------------

    /// Export observation metadata for the given columns and rows as a blob.
    pub async fn download_metadata(
        &self,
        label_names: &[String],
        row_labels: &[i32],
    ) -> Result<Bytes> {
        let body = json!({
            "labelNames": label_names,
            "filter": { "obs": { "index": row_labels } },
        });
        put_json_binary(&self.client, &self.url("downloadMetadata"), &body).await
    }

    pub async fn download_var_metadata(&self, layout: &str) -> Result<Bytes> {
        let body = json!({ "embName": layout });
        put_json_binary(&self.client, &self.url("downloadVarMetadata"), &body).await
    }

    pub async fn download_genedata(&self) -> Result<Bytes> {
        put_json_binary(&self.client, &self.url("downloadGenedata"), &json!({})).await
    }

    /// Cleanup call made a while after a served-file download completes.
    pub async fn download_callback(&self, path: &str) -> Result<()> {
        let url = format!(
            "{}?path={}",
            self.url("downloadCallback"),
            urlencoding::encode(path)
        );
        do_binary_request(&self.client, &url).await?;
        Ok(())
    }

    /// Whole-dataset save. Abortable; the wall-clock timeout funnels into
    /// the same abort path.
    pub async fn save_dataset(
        &self,
        save_name: &str,
        label_names: &[String],
        labels: &serde_json::Value,
        layout: &str,
        row_labels: &[i32],
        abort: &AbortHandle,
    ) -> Result<()> {
        let body = json!({
            "saveName": save_name,
            "labelNames": label_names,
            "labels": labels,
            "currentLayout": layout,
            "filter": { "obs": { "index": row_labels } },
        });
        let fut = async {
            put_json::<serde_json::Value>(&self.client, &self.url("output"), &body).await?;
            Ok(())
        };
        abortable(fut, abort, Some(SAVE_TIMEOUT)).await
    }
}
