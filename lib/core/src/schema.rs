use serde::{Deserialize, Serialize};

use crate::column::{ColumnData, ColumnType};
use crate::{Error, Result};

/// Per-column descriptor within the dataset schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub writable: bool,
    /// Category list for categorical columns, in enumeration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

/// An embedding layout: a named set of per-observation coordinate columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutSchema {
    pub name: String,
    /// Names of the dimension columns, e.g. `["umap_0", "umap_1"]`.
    pub dims: Vec<String>,
}

impl LayoutSchema {
    /// Conventional two-dimension layout: `<name>_0`, `<name>_1`.
    #[must_use]
    pub fn planar(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dims: vec![format!("{name}_0"), format!("{name}_1")],
        }
    }
}

/// Dataset-wide metadata: matrix dimensions, per-field column descriptors
/// and available embeddings.
///
/// Immutable except through the transformation methods below, each of
/// which returns a new schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub n_obs: usize,
    pub n_var: usize,
    pub obs_columns: Vec<ColumnSchema>,
    pub var_columns: Vec<ColumnSchema>,
    pub layouts: Vec<LayoutSchema>,
    /// Name of the obs label column.
    pub obs_index: String,
    /// Name of the var label column.
    pub var_index: String,
    /// Name of the dataset's native layout, when the server declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_name: Option<String>,
}

impl Schema {
    #[must_use]
    pub fn obs_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.obs_columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn var_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.var_columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn layout(&self, name: &str) -> Option<&LayoutSchema> {
        self.layouts.iter().find(|l| l.name == name)
    }

    #[must_use]
    pub fn layout_names(&self) -> Vec<&str> {
        self.layouts.iter().map(|l| l.name.as_str()).collect()
    }

    /// The column must exist and be writable.
    pub fn writable_check(&self, name: &str) -> Result<&ColumnSchema> {
        match self.obs_column(name) {
            Some(c) if c.writable => Ok(c),
            _ => Err(Error::NotWritable(name.to_string())),
        }
    }

    /// The column must exist, be writable, and be categorical.
    pub fn writable_category_check(&self, name: &str) -> Result<&ColumnSchema> {
        let col = self.writable_check(name)?;
        if col.kind != ColumnType::Categorical {
            return Err(Error::NotCategorical(name.to_string()));
        }
        Ok(col)
    }

    pub fn add_obs_column(&self, col: ColumnSchema) -> Result<Schema> {
        if self.obs_column(&col.name).is_some() {
            return Err(Error::ColumnExists(col.name));
        }
        let mut out = self.clone();
        out.obs_columns.push(col);
        Ok(out)
    }

    pub fn remove_obs_column(&self, name: &str) -> Result<Schema> {
        if self.obs_column(name).is_none() {
            return Err(Error::ColumnNotFound(name.to_string()));
        }
        let mut out = self.clone();
        out.obs_columns.retain(|c| c.name != name);
        Ok(out)
    }

    /// Append `category` to an obs column's category list if not present.
    pub fn add_obs_category(&self, name: &str, category: &str) -> Result<Schema> {
        let mut out = self.clone();
        let col = out
            .obs_columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        let categories = col.categories.get_or_insert_with(Vec::new);
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
        Ok(out)
    }

    pub fn remove_obs_category(&self, name: &str, category: &str) -> Result<Schema> {
        let mut out = self.clone();
        let col = out
            .obs_columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        match &mut col.categories {
            Some(categories) if categories.iter().any(|c| c == category) => {
                categories.retain(|c| c != category);
                Ok(out)
            }
            _ => Err(Error::UnknownCategory(category.to_string())),
        }
    }

    pub fn add_layout(&self, layout: LayoutSchema) -> Result<Schema> {
        if self.layout(&layout.name).is_some() {
            return Err(Error::LayoutExists(layout.name));
        }
        let mut out = self.clone();
        out.layouts.push(layout);
        Ok(out)
    }

    pub fn remove_layout(&self, name: &str) -> Result<Schema> {
        if self.layout(name).is_none() {
            return Err(Error::LayoutNotFound(name.to_string()));
        }
        let mut out = self.clone();
        out.layouts.retain(|l| l.name != name);
        Ok(out)
    }
}

/// Reconcile a categorical column's declared categories with the values
/// actually observed in loaded data. Declared order is preserved; observed
/// values missing from the declaration are appended in first-seen order.
#[must_use]
pub fn normalize_categories(
    declared: Option<&[String]>,
    observed: &ColumnData,
) -> Vec<String> {
    let mut categories: Vec<String> = declared.map(<[String]>::to_vec).unwrap_or_default();
    for value in observed.summarize_categories() {
        if !categories.iter().any(|c| *c == value) {
            categories.push(value);
        }
    }
    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema {
            n_obs: 5,
            n_var: 3,
            obs_columns: vec![
                ColumnSchema {
                    name: "name_0".to_string(),
                    kind: ColumnType::Categorical,
                    writable: false,
                    categories: None,
                },
                ColumnSchema {
                    name: "cell_type".to_string(),
                    kind: ColumnType::Categorical,
                    writable: true,
                    categories: Some(vec!["t".to_string(), "b".to_string()]),
                },
                ColumnSchema {
                    name: "n_counts".to_string(),
                    kind: ColumnType::Float32,
                    writable: true,
                    categories: None,
                },
            ],
            var_columns: vec![ColumnSchema {
                name: "name_0".to_string(),
                kind: ColumnType::Categorical,
                writable: false,
                categories: None,
            }],
            layouts: vec![LayoutSchema::planar("umap")],
            obs_index: "name_0".to_string(),
            var_index: "name_0".to_string(),
            root_name: None,
        }
    }

    #[test]
    fn test_writable_checks() {
        let s = schema();
        assert!(s.writable_check("name_0").is_err());
        assert!(s.writable_check("cell_type").is_ok());
        assert!(matches!(
            s.writable_category_check("n_counts"),
            Err(Error::NotCategorical(_))
        ));
    }

    #[test]
    fn test_add_then_remove_column_round_trips() {
        let s = schema();
        let added = s
            .add_obs_column(ColumnSchema {
                name: "cluster".to_string(),
                kind: ColumnType::Categorical,
                writable: true,
                categories: Some(vec!["c1".to_string()]),
            })
            .unwrap();
        assert!(added.obs_column("cluster").is_some());
        let removed = added.remove_obs_column("cluster").unwrap();
        assert_eq!(removed, s);
    }

    #[test]
    fn test_category_add_is_idempotent() {
        let s = schema();
        let s2 = s.add_obs_category("cell_type", "nk").unwrap();
        let s3 = s2.add_obs_category("cell_type", "nk").unwrap();
        assert_eq!(
            s3.obs_column("cell_type").unwrap().categories,
            Some(vec!["t".to_string(), "b".to_string(), "nk".to_string()])
        );
    }

    #[test]
    fn test_remove_unknown_category() {
        let s = schema();
        assert!(matches!(
            s.remove_obs_category("cell_type", "zz"),
            Err(Error::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_normalize_categories_appends_observed() {
        let observed =
            ColumnData::Categorical(vec!["b".into(), "nk".into(), "t".into()]);
        let declared = vec!["t".to_string(), "b".to_string()];
        assert_eq!(
            normalize_categories(Some(&declared), &observed),
            vec!["t", "b", "nk"]
        );
    }
}
