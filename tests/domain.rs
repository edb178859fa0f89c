use assert_matches::assert_matches;

use ags_harvester::domain::{ObjectId, QueryParameters, ServiceUrl};
use ags_harvester::error::HarvestError;

#[test]
fn service_url_splits_user_query() {
    let url: ServiceUrl =
        "https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0?where=ACRES%3E5&outFields=APN,ACRES"
            .parse()
            .unwrap();
    assert_eq!(
        url.base(),
        "https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0"
    );
    assert_eq!(url.user_params().get("where"), Some("ACRES>5"));
    assert_eq!(url.user_params().get("outFields"), Some("APN,ACRES"));
    assert_eq!(
        url.query_endpoint(),
        "https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0/query/"
    );
}

#[test]
fn service_url_accepts_query_endpoint() {
    let url: ServiceUrl = "https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0/query/"
        .parse()
        .unwrap();
    assert_eq!(
        url.base(),
        "https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0"
    );
    assert!(url.user_params().is_empty());
}

#[test]
fn service_url_rejects_garbage() {
    let err = "not a url".parse::<ServiceUrl>().unwrap_err();
    assert_matches!(err, HarvestError::InvalidServiceUrl(_));
}

#[test]
fn object_id_parses_trimmed_numbers() {
    let id: ObjectId = " 42 ".parse().unwrap();
    assert_eq!(id.get(), 42);
}

#[test]
fn insert_replaces_in_place() {
    let mut params: QueryParameters = [("a", "1"), ("b", "2")].into_iter().collect();
    params.insert("a", "3");
    params.insert_if_absent("b", "4");
    params.insert_if_absent("c", "5");
    assert_eq!(
        params.iter().collect::<Vec<_>>(),
        vec![("a", "3"), ("b", "2"), ("c", "5")]
    );
}
