pub mod aggregate;
pub mod app;
pub mod arcgis;
pub mod config;
pub mod domain;
pub mod emit;
pub mod error;
pub mod geojson;
pub mod output;
pub mod partition;
