pub mod config;
pub mod domain;
pub mod error;
pub mod gcloud;
pub mod gcs;
pub mod lims;
pub mod mash;
pub mod migrate;
pub mod output;
pub mod phoenix;
pub mod poppunk;
pub mod s3;
pub mod samplesheet;
pub mod store;
pub mod table;
pub mod tables;
pub mod terra;
pub mod tools;
