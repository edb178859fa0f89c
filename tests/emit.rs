use std::cell::RefCell;

use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use ags_harvester::aggregate::AggregatedBatch;
use ags_harvester::app::{ProgressEvent, ProgressSink};
use ags_harvester::arcgis::{Feature, FeatureSet};
use ags_harvester::emit::{BatchEmitter, base_name};
use ags_harvester::error::HarvestError;
use ags_harvester::geojson::{EsriGeoJsonConverter, FeatureCollection, FeatureConverter};

#[derive(Default)]
struct RecordingSink {
    events: RefCell<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.borrow_mut().push(event);
    }
}

struct FailingConverter;

impl FeatureConverter for FailingConverter {
    fn convert(&self, _set: &FeatureSet) -> Result<FeatureCollection, HarvestError> {
        Err(HarvestError::Conversion("bad ring".to_string()))
    }
}

fn batch(file_index: usize) -> AggregatedBatch {
    let mut envelope = Map::new();
    envelope.insert("geometryType".to_string(), json!("esriGeometryPoint"));
    envelope.insert("spatialReference".to_string(), json!({ "wkid": 4326 }));
    let mut attributes = Map::new();
    attributes.insert("OBJECTID".to_string(), Value::from(7));
    AggregatedBatch {
        file_index,
        chunk_count: 1,
        failed_chunks: Vec::new(),
        features: FeatureSet {
            envelope,
            features: vec![Feature {
                attributes,
                geometry: Some(json!({ "x": -105.0, "y": 40.0 })),
            }],
        },
    }
}

#[test]
fn writes_both_formats() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().join("nested").join("out")).unwrap();
    let emitter = BatchEmitter::new(out.clone(), EsriGeoJsonConverter).unwrap();
    let sink = RecordingSink::default();

    let files = emitter.emit(&batch(1), "hydrants", 4, &sink).unwrap();

    assert_eq!(files.primary, out.join("hydrants_0001.json"));
    assert_eq!(files.secondary, Some(out.join("hydrants_0001.geojson")));

    let primary: Value =
        serde_json::from_str(&std::fs::read_to_string(files.primary.as_std_path()).unwrap())
            .unwrap();
    assert_eq!(primary["geometryType"], "esriGeometryPoint");
    assert_eq!(primary["features"][0]["attributes"]["OBJECTID"], 7);

    let secondary: Value = serde_json::from_str(
        &std::fs::read_to_string(out.join("hydrants_0001.geojson").as_std_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(secondary["type"], "FeatureCollection");
    assert_eq!(
        secondary["features"][0]["geometry"],
        json!({ "type": "Point", "coordinates": [-105.0, 40.0] })
    );

    let written = sink
        .events
        .borrow()
        .iter()
        .filter(|event| matches!(event, ProgressEvent::FileWritten { .. }))
        .count();
    assert_eq!(written, 2);
}

#[test]
fn converter_failure_only_skips_secondary() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let emitter = BatchEmitter::new(out.clone(), FailingConverter).unwrap();
    let sink = RecordingSink::default();

    let files = emitter.emit(&batch(0), "hydrants", 1, &sink).unwrap();

    assert_eq!(files.primary, out.join("hydrants.json"));
    assert!(files.primary.exists());
    assert_eq!(files.secondary, None);
    assert!(!out.join("hydrants.geojson").exists());
    assert!(sink.events.borrow().iter().any(|event| matches!(
        event,
        ProgressEvent::ConversionFailed { reason, removed_stale: false, .. }
            if reason.contains("bad ring")
    )));
}

#[test]
fn converter_failure_removes_previous_secondary() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

    let first = BatchEmitter::new(out.clone(), EsriGeoJsonConverter).unwrap();
    first
        .emit(&batch(0), "hydrants", 1, &RecordingSink::default())
        .unwrap();
    assert!(out.join("hydrants.geojson").exists());

    let rerun = BatchEmitter::new(out.clone(), FailingConverter).unwrap();
    let sink = RecordingSink::default();
    let files = rerun.emit(&batch(0), "hydrants", 1, &sink).unwrap();

    assert_eq!(files.secondary, None);
    assert!(out.join("hydrants.json").exists());
    assert!(!out.join("hydrants.geojson").exists());
    assert!(sink.events.borrow().iter().any(|event| matches!(
        event,
        ProgressEvent::ConversionFailed { removed_stale: true, .. }
    )));
}

#[test]
fn rewriting_a_batch_replaces_the_file() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let emitter = BatchEmitter::new(out.clone(), EsriGeoJsonConverter).unwrap();
    let sink = RecordingSink::default();

    std::fs::write(out.join("hydrants.json").as_std_path(), b"stale").unwrap();
    emitter.emit(&batch(0), "hydrants", 1, &sink).unwrap();

    let content = std::fs::read_to_string(out.join("hydrants.json").as_std_path()).unwrap();
    assert!(content.starts_with('{'));
    let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(leftovers, 2);
}

#[test]
fn dotted_service_names_keep_their_suffix() {
    let temp = tempfile::tempdir().unwrap();
    let out = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let emitter = BatchEmitter::new(out.clone(), EsriGeoJsonConverter).unwrap();

    let files = emitter
        .emit(&batch(0), "roads.v2", 1, &RecordingSink::default())
        .unwrap();
    assert_eq!(files.primary, out.join("roads.v2.json"));
}

#[test]
fn base_name_padding() {
    assert_eq!(base_name("service", 0, 1), "service");
    assert_eq!(base_name("service", 0, 3), "service_0000");
    assert_eq!(base_name("service", 1, 3), "service_0001");
    assert_eq!(base_name("service", 2, 3), "service_0002");
}
