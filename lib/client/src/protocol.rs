// JSON framing for the duplex job channels: typed inbound messages and
// outbound request builders.

use serde::Deserialize;
use serde_json::json;

use cellgrid_core::{Error, LayoutSchema, Result, Schema};

use crate::channel::JobFamily;
use crate::sankey::{SankeyParams, SankeyResponse};

/// Raw differential-expression rows: `[var_offset, stat...]` per gene,
/// split by polarity. Offsets are mapped to gene names by the session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DiffExpResponse {
    pub positive: Vec<Vec<f64>>,
    pub negative: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffExpMessage {
    pub response: DiffExpResponse,
    #[serde(default)]
    pub multiplex: bool,
    /// Generation number of the multiplexed batch this partial belongs to.
    #[serde(default)]
    pub num: u64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, rename = "nameList")]
    pub name_list: Vec<String>,
    #[serde(default, rename = "dateString")]
    pub date_string: Option<String>,
    #[serde(default)]
    pub grouping: Option<String>,
    #[serde(default, rename = "groupName")]
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReembeddingResponse {
    #[serde(rename = "layoutSchema")]
    pub layout_schema: LayoutSchema,
    pub schema: Schema,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SankeyMessage {
    pub response: SankeyResponse,
    #[serde(rename = "catNames")]
    pub cat_names: Vec<String>,
    pub threshold: f64,
    pub params: SankeyParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeidenMessage {
    /// Cluster label per row of the subset the job ran on.
    pub response: Vec<String>,
    #[serde(rename = "cName")]
    pub name: String,
}

/// Typed inbound message, dispatched by the `cfn` family tag.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Fail { family: JobFamily, message: String },
    DiffExp(DiffExpMessage),
    Reembedding(ReembeddingResponse),
    Sankey(SankeyMessage),
    Leiden(LeidenMessage),
    DownloadAnndata { response: String },
}

pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;

    let tag = value
        .get("cfn")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Decode("inbound message missing cfn tag".to_string()))?;
    let family = JobFamily::from_tag(tag)
        .ok_or_else(|| Error::Decode(format!("unknown job family: {tag}")))?;

    if value.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
        let message = value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("server reported failure")
            .to_string();
        return Ok(InboundMessage::Fail { family, message });
    }

    match family {
        JobFamily::DiffExp => serde_json::from_value(value)
            .map(InboundMessage::DiffExp)
            .map_err(|e| Error::Decode(e.to_string())),
        JobFamily::Reembedding => {
            let response = value
                .get("response")
                .cloned()
                .ok_or_else(|| Error::Decode("reembedding message missing response".to_string()))?;
            serde_json::from_value(response)
                .map(InboundMessage::Reembedding)
                .map_err(|e| Error::Decode(e.to_string()))
        }
        JobFamily::Sankey => serde_json::from_value(value)
            .map(InboundMessage::Sankey)
            .map_err(|e| Error::Decode(e.to_string())),
        JobFamily::Leiden => serde_json::from_value(value)
            .map(InboundMessage::Leiden)
            .map_err(|e| Error::Decode(e.to_string())),
        JobFamily::DownloadAnndata => {
            let response = value
                .get("response")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(InboundMessage::DownloadAnndata { response })
        }
    }
}

/// Observation-set filter carried by export and comparison requests.
#[must_use]
pub fn obs_index_filter(labels: &[i32]) -> serde_json::Value {
    json!({ "filter": { "obs": { "index": labels } } })
}

/// One-shot differential-expression request.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn diffexp_request(
    count: usize,
    set1: &[i32],
    set2: &[i32],
    layer: &str,
    scale: bool,
    group_name: &str,
) -> serde_json::Value {
    json!({
        "mode": "topN",
        "count": count,
        "set1": obs_index_filter(set1),
        "set2": obs_index_filter(set2),
        "multiplex": false,
        "layer": layer,
        "scale": scale,
        "groupName": group_name,
    })
}

/// One comparison of a multiplexed batch, tagged with the batch generation.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn diffexp_multiplex_request(
    count: usize,
    set1: &[i32],
    set2: &[i32],
    layer: &str,
    scale: bool,
    grouping: &str,
    date_string: &str,
    name_list: &[String],
    category: &str,
    generation: u64,
) -> serde_json::Value {
    json!({
        "mode": "topN",
        "count": count,
        "set1": obs_index_filter(set1),
        "set2": obs_index_filter(set2),
        "multiplex": true,
        "layer": layer,
        "scale": scale,
        "grouping": grouping,
        "dateString": date_string,
        "nameList": name_list,
        "category": category,
        "num": generation,
        "groupName": format!("{grouping} ({date_string})"),
    })
}

#[must_use]
pub fn sankey_request(
    cat_names: &[String],
    layout: &str,
    threshold: f64,
    params: &SankeyParams,
) -> serde_json::Value {
    json!({
        "catNames": cat_names,
        "currentLayout": layout,
        "threshold": threshold,
        "params": params,
    })
}

#[must_use]
pub fn leiden_request(name: &str, labels: &[i32], resolution: f64, layout: &str) -> serde_json::Value {
    json!({
        "cName": name,
        "filter": { "obs": { "index": labels } },
        "resolution": resolution,
        "currentLayout": layout,
    })
}

#[must_use]
pub fn reembedding_request(params: &serde_json::Value, parent_layout: &str, name: &str) -> serde_json::Value {
    json!({
        "params": params,
        "parentName": parent_layout,
        "embName": name,
    })
}

#[must_use]
pub fn download_request(
    label_names: &[String],
    layout: &str,
    labels: &[i32],
) -> serde_json::Value {
    json!({
        "labelNames": label_names,
        "currentLayout": layout,
        "filter": { "obs": { "index": labels } },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_routes_before_payload_decode() {
        let msg = parse_inbound(r#"{"cfn":"sankey","fail":true}"#).unwrap();
        match msg {
            InboundMessage::Fail { family, .. } => assert_eq!(family, JobFamily::Sankey),
            _ => panic!("expected fail"),
        }
    }

    #[test]
    fn test_unknown_family_rejected() {
        let err = parse_inbound(r#"{"cfn":"mystery"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_diffexp_message_parses() {
        let text = r#"{
            "cfn": "diffexp",
            "response": {"positive": [[0, 1.5]], "negative": [[2, -0.5]]},
            "multiplex": true,
            "num": 7,
            "category": "b-cell",
            "nameList": ["b-cell", "t-cell"],
            "dateString": "1_2_2026",
            "grouping": "cell_type"
        }"#;
        match parse_inbound(text).unwrap() {
            InboundMessage::DiffExp(m) => {
                assert!(m.multiplex);
                assert_eq!(m.num, 7);
                assert_eq!(m.category.as_deref(), Some("b-cell"));
                assert_eq!(m.response.positive, vec![vec![0.0, 1.5]]);
            }
            _ => panic!("expected diffexp"),
        }
    }

    #[test]
    fn test_download_message_parses() {
        let msg = parse_inbound(r#"{"cfn":"downloadAnndata","response":"/files/out.h5ad"}"#)
            .unwrap();
        match msg {
            InboundMessage::DownloadAnndata { response } => {
                assert_eq!(response, "/files/out.h5ad");
            }
            _ => panic!("expected download"),
        }
    }
}
