// Category-flow ("sankey") results: cache keying and graph construction.

use serde::{Deserialize, Serialize};

use crate::UNASSIGNED_LABEL;

/// Tunable parameters of a category-flow computation. All of them
/// participate in the cache key so identical requests are served from
/// cache without recomputation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SankeyParams {
    pub sam_hvg: bool,
    pub sankey_method: String,
    pub data_layer: String,
    pub selected_genes: Vec<String>,
    pub gene_metadata: String,
    pub num_edges: usize,
}

/// Raw server result: parallel edge and weight lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SankeyResponse {
    pub edges: Vec<(String, String)>,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SankeyLink {
    pub source: String,
    pub target: String,
    pub value: f64,
}

/// Rendered flow graph: filtered links plus deduplicated node ids.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SankeyGraph {
    pub links: Vec<SankeyLink>,
    pub nodes: Vec<String>,
}

/// Composite cache key for one category-flow request.
#[must_use]
pub fn sankey_cache_key(cat_names: &[String], layout: &str, params: &SankeyParams) -> String {
    format!(
        "{}_{}_{}_{}_{}_{}_{}_{}",
        cat_names.join(";"),
        layout,
        params.sam_hvg,
        params.sankey_method,
        params.data_layer,
        params.selected_genes.join(";"),
        params.gene_metadata,
        params.num_edges
    )
}

/// Node ids are `<category>_<label>`; the label part is everything after
/// the first underscore.
fn node_label(node: &str) -> &str {
    node.split_once('_').map_or("", |(_, label)| label)
}

/// Build the rendered graph: edges at or below the weight threshold, and
/// edges touching an "unassigned" node on either end, are excluded. Node
/// ids are deduplicated preserving first-seen order.
#[must_use]
pub fn build_sankey_graph(response: &SankeyResponse, threshold: f64) -> SankeyGraph {
    let mut links = Vec::new();
    let mut nodes: Vec<String> = Vec::new();

    for (i, (source, target)) in response.edges.iter().enumerate() {
        let Some(&weight) = response.weights.get(i) else {
            continue;
        };
        if weight <= threshold
            || node_label(source) == UNASSIGNED_LABEL
            || node_label(target) == UNASSIGNED_LABEL
        {
            continue;
        }
        for node in [source, target] {
            if !nodes.iter().any(|n| n == node) {
                nodes.push(node.clone());
            }
        }
        links.push(SankeyLink {
            source: source.clone(),
            target: target.clone(),
            value: weight,
        });
    }

    SankeyGraph { links, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SankeyParams {
        SankeyParams {
            sam_hvg: false,
            sankey_method: "default".to_string(),
            data_layer: "X".to_string(),
            selected_genes: vec!["g1".to_string()],
            gene_metadata: "".to_string(),
            num_edges: 50,
        }
    }

    #[test]
    fn test_threshold_and_unassigned_filtering() {
        let response = SankeyResponse {
            edges: vec![
                ("A_x".to_string(), "B_y".to_string()),
                ("A_x".to_string(), "A_unassigned".to_string()),
            ],
            weights: vec![0.9, 0.95],
        };
        let graph = build_sankey_graph(&response, 0.5);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].source, "A_x");
        assert_eq!(graph.links[0].target, "B_y");
        assert_eq!(graph.nodes, vec!["A_x".to_string(), "B_y".to_string()]);
    }

    #[test]
    fn test_nodes_deduplicated_first_seen_order() {
        let response = SankeyResponse {
            edges: vec![
                ("A_x".to_string(), "B_y".to_string()),
                ("B_y".to_string(), "C_z".to_string()),
            ],
            weights: vec![1.0, 1.0],
        };
        let graph = build_sankey_graph(&response, 0.0);
        assert_eq!(
            graph.nodes,
            vec!["A_x".to_string(), "B_y".to_string(), "C_z".to_string()]
        );
    }

    #[test]
    fn test_label_is_suffix_after_first_underscore() {
        // Category names may themselves contain underscores.
        let response = SankeyResponse {
            edges: vec![("A_un_known".to_string(), "B_y".to_string())],
            weights: vec![1.0],
        };
        let graph = build_sankey_graph(&response, 0.0);
        assert_eq!(graph.links.len(), 1);
    }

    #[test]
    fn test_cache_key_covers_all_parameters() {
        let cats = vec!["cell_type".to_string()];
        let a = sankey_cache_key(&cats, "umap", &params());
        let mut p2 = params();
        p2.num_edges = 51;
        let b = sankey_cache_key(&cats, "umap", &p2);
        assert_ne!(a, b);
        assert_eq!(a, sankey_cache_key(&cats, "umap", &params()));
    }
}
