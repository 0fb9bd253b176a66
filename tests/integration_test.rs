// Integration tests for cellgrid
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use cellgrid::prelude::*;
use cellgrid::{FetchOpts, MatrixLoader, Rect, PRIORITY_DEFAULT, PRIORITY_LAYOUT};
use cellgrid_matrix::LoadResult;

/// In-memory loader standing in for the dataset server: five observations,
/// three genes, one umap layout.
struct FixtureLoader {
    calls: AtomicUsize,
}

impl FixtureLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MatrixLoader for FixtureLoader {
    fn load<'a>(
        &'a self,
        field: Field,
        query: &'a Query,
        _opts: &'a FetchOpts,
    ) -> BoxFuture<'a, cellgrid::Result<LoadResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let simple = query.expect_simple().map(str::to_string);
            let (columns, frame) = match field {
                Field::Obs => {
                    let column = simple?;
                    let data: ColumnData = match column.as_str() {
                        "n_counts" => ColumnData::Float32(vec![10.0, 55.0, 30.0, 80.0, 5.0]),
                        _ => ColumnData::Categorical(
                            ["t", "b", "t", "nk", "b"].iter().map(|s| s.to_string()).collect(),
                        ),
                    };
                    let frame = Dataframe::empty(RowIndex::identity(5)).with_col(&column, data)?;
                    (vec![column], frame)
                }
                Field::Var => {
                    let column = simple?;
                    let frame = Dataframe::empty(RowIndex::identity(3)).with_col(
                        &column,
                        ColumnData::Categorical(
                            ["g0", "g1", "g2"].iter().map(|s| s.to_string()).collect(),
                        ),
                    )?;
                    (vec![column], frame)
                }
                Field::Emb => {
                    let name = simple?;
                    let frame = Dataframe::empty(RowIndex::identity(5))
                        .with_col(
                            &format!("{name}_0"),
                            ColumnData::Float32(vec![0.1, 0.9, 0.2, 5.0, 6.0]),
                        )?
                        .with_col(
                            &format!("{name}_1"),
                            ColumnData::Float32(vec![0.1, 0.8, 0.3, 5.0, 6.0]),
                        )?;
                    (vec![format!("{name}_0"), format!("{name}_1")], frame)
                }
                _ => {
                    return Err(Error::UnknownField(field.to_string()));
                }
            };
            Ok(LoadResult { columns, frame })
        })
    }
}

fn fixture_schema() -> Schema {
    Schema {
        n_obs: 5,
        n_var: 3,
        obs_columns: vec![
            ColumnSchema {
                name: "cell_type".to_string(),
                kind: ColumnType::Categorical,
                writable: true,
                categories: Some(vec!["t".to_string(), "b".to_string(), "nk".to_string()]),
            },
            ColumnSchema {
                name: "n_counts".to_string(),
                kind: ColumnType::Float32,
                writable: false,
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

fn fixture_matrix() -> (Arc<AnnoMatrix>, Arc<FixtureLoader>) {
    let loader = FixtureLoader::new();
    let scheduler = FetchScheduler::new(5);
    let matrix = AnnoMatrix::base_matrix(
        Arc::clone(&loader) as Arc<dyn MatrixLoader>,
        scheduler,
        fixture_schema(),
    );
    (matrix, loader)
}

#[tokio::test]
async fn test_identical_concurrent_queries_share_one_fetch() {
    let (matrix, loader) = fixture_matrix();
    let query = Query::simple("cell_type");

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&matrix);
            let q = query.clone();
            tokio::spawn(async move { m.fetch(Field::Obs, &q).await })
        })
        .collect();
    let mut frames = Vec::new();
    for task in tasks {
        frames.push(task.await.unwrap().unwrap());
    }

    assert_eq!(loader.call_count(), 1);
    for frame in &frames[1..] {
        assert_eq!(
            frame.col("cell_type").unwrap(),
            frames[0].col("cell_type").unwrap()
        );
    }
}

#[tokio::test]
async fn test_scheduler_priority_order() {
    let scheduler = FetchScheduler::new(1);
    let order: Arc<parking_lot::Mutex<Vec<u32>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let s = Arc::clone(&scheduler);
        tokio::spawn(async move {
            s.run(PRIORITY_DEFAULT, async move {
                let _ = hold_rx.await;
            })
            .await;
        })
    };
    while scheduler.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    let mut tasks = Vec::new();
    for (tag, priority) in [(1u32, PRIORITY_DEFAULT), (2, PRIORITY_LAYOUT), (3, PRIORITY_DEFAULT)] {
        let s = Arc::clone(&scheduler);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            s.run(priority, async move {
                order.lock().push(tag);
            })
            .await;
        }));
        while scheduler.pending() < tasks.len() {
            tokio::task::yield_now().await;
        }
    }

    hold_tx.send(()).unwrap();
    holder.await.unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    // Priority 0 first, then the two priority-10 fetches in submission order.
    assert_eq!(*order.lock(), vec![2, 1, 3]);
}

#[tokio::test]
async fn test_views_never_mutate_their_parent() {
    let (matrix, _loader) = fixture_matrix();
    matrix
        .fetch(Field::Obs, &Query::simple("cell_type"))
        .await
        .unwrap();
    let schema_before = matrix.schema().clone();

    let view = matrix
        .with_obs_column(
            ColumnSchema {
                name: "selected".to_string(),
                kind: ColumnType::Boolean,
                writable: true,
                categories: None,
            },
            ColumnInit::Broadcast(CellValue::Bool(false)),
        )
        .unwrap();
    let subset = view.subset_by_labels(&[0, 2, 4]).unwrap();

    assert_eq!(matrix.schema(), &schema_before);
    assert_eq!(matrix.n_obs(), 5);
    assert_eq!(view.n_obs(), 5);
    assert_eq!(subset.n_obs(), 3);
    assert!(matrix.schema().obs_column("selected").is_none());
}

#[tokio::test]
async fn test_view_columns_match_view_row_count() {
    let (matrix, _loader) = fixture_matrix();
    let subset = matrix.subset_by_labels(&[1, 3]).unwrap();

    let frame = subset
        .fetch(Field::Obs, &Query::simple("cell_type"))
        .await
        .unwrap();
    assert_eq!(frame.n_rows(), subset.n_obs());
    for name in frame.col_names() {
        assert_eq!(frame.col(name).unwrap().len(), subset.n_obs());
    }
    assert_eq!(
        frame.col("cell_type").unwrap(),
        &ColumnData::Categorical(vec!["b".to_string(), "nk".to_string()])
    );
}

#[tokio::test]
async fn test_add_then_drop_restores_schema() {
    let (matrix, _loader) = fixture_matrix();
    let added = matrix
        .with_obs_column(
            ColumnSchema {
                name: "cluster".to_string(),
                kind: ColumnType::Categorical,
                writable: true,
                categories: None,
            },
            ColumnInit::Broadcast(CellValue::from("c0")),
        )
        .unwrap();
    let restored = added.drop_obs_column("cluster").unwrap();
    assert_eq!(restored.schema(), matrix.schema());
}

#[tokio::test]
async fn test_crossfilter_categorical_and_range_selection() {
    let (matrix, _loader) = fixture_matrix();
    let crossfilter = Crossfilter::new(Arc::clone(&matrix));

    let (_, selected) = crossfilter
        .select_categorical("cell_type", &["t".to_string()])
        .await
        .unwrap();
    assert_eq!(selected.count_selected(), 2);
    assert_eq!(selected.selected_labels(), vec![0, 2]);

    let (_, ranged) = crossfilter
        .select_range("n_counts", 20.0, 60.0)
        .await
        .unwrap();
    assert_eq!(ranged.selected_labels(), vec![1, 2]);
}

#[tokio::test]
async fn test_crossfilter_brush_and_subset_invalidation() {
    let (matrix, _loader) = fixture_matrix();
    let crossfilter = Crossfilter::new(Arc::clone(&matrix));

    let rect = Rect {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };
    let (_, brushed) = crossfilter
        .brush_rect("umap", BrushPhase::End, Some(rect))
        .await
        .unwrap();
    assert_eq!(brushed.selected_labels(), vec![0, 1, 2]);

    // Subsetting changes the row count: the selection is recomputed, not
    // reinterpreted against stale offsets.
    let (narrowed_matrix, narrowed) = brushed.subset(&brushed.selected_labels()).unwrap();
    assert_eq!(narrowed_matrix.n_obs(), 3);
    assert_eq!(narrowed.count_selected(), 3);

    let (restored_matrix, restored) = narrowed.reset_subset();
    assert_eq!(restored_matrix.n_obs(), 5);
    assert_eq!(restored.count_selected(), 5);
}

#[tokio::test]
async fn test_layout_fetch_is_cached() {
    let (matrix, loader) = fixture_matrix();
    let frame = matrix
        .fetch(Field::Emb, &Query::simple("umap"))
        .await
        .unwrap();
    assert!(frame.has_col("umap_0"));
    assert!(frame.has_col("umap_1"));

    matrix
        .fetch(Field::Emb, &Query::simple("umap"))
        .await
        .unwrap();
    assert_eq!(loader.call_count(), 1);
}
