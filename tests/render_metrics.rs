use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use shutterbox::application::engine::{
    EncodeDirective, EngineError, ImageTransformEngine, ResizeDirective,
};
use shutterbox::application::render::{RenderError, RenderService};
use shutterbox::infra::storage::{CacheStore, OriginalStore, StorageLayout};
use tempfile::TempDir;

struct SlowEngine;

#[async_trait]
impl ImageTransformEngine for SlowEngine {
    async fn transform(
        &self,
        source: Bytes,
        resize: Option<ResizeDirective>,
        _encode: EncodeDirective,
    ) -> Result<Bytes, EngineError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if resize.is_some_and(|resize| resize.width == Some(13)) {
            return Err(EngineError::Encode("unlucky width".to_string()));
        }
        Ok(source)
    }
}

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("temp dir");
    let layout = Arc::new(StorageLayout::new(dir.path(), "originals", "cache"));
    layout.ensure().expect("storage roots");
    std::fs::write(dir.path().join("originals/abc.png"), b"png-bytes").expect("original");

    let service = Arc::new(RenderService::new(
        Arc::new(OriginalStore::new(Arc::clone(&layout))),
        Arc::new(CacheStore::new(layout)),
        Arc::new(SlowEngine),
    ));

    // Pass-through
    service
        .render("abc.png", &HashMap::new())
        .await
        .expect("pass-through");

    // Two concurrent misses: one leader, one coalesced follower.
    let resize = query(&[("w", "64")]);
    let (first, second) = tokio::join!(
        service.render("abc.png", &resize),
        service.render("abc.png", &resize)
    );
    first.expect("leader");
    second.expect("follower");

    // Hit
    service.render("abc.png", &resize).await.expect("hit");

    // Transform error
    let failing = query(&[("w", "13")]);
    assert!(matches!(
        service.render("abc.png", &failing).await,
        Err(RenderError::Transform(_))
    ));

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "shutterbox_render_passthrough_total",
        "shutterbox_render_cache_hit_total",
        "shutterbox_render_cache_miss_total",
        "shutterbox_render_coalesced_total",
        "shutterbox_render_transform_error_total",
        "shutterbox_render_transform_ms",
    ];
    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let counter = |name: &str| {
        snapshot
            .iter()
            .find_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) if key.key().name() == name => Some(*count),
                _ => None,
            })
            .unwrap_or_default()
    };
    assert_eq!(counter("shutterbox_render_passthrough_total"), 1);
    assert_eq!(counter("shutterbox_render_cache_miss_total"), 3);
    assert_eq!(counter("shutterbox_render_coalesced_total"), 1);
    assert_eq!(counter("shutterbox_render_cache_hit_total"), 1);
    assert_eq!(counter("shutterbox_render_transform_error_total"), 1);
}
