pub mod store;

pub use store::{is_image_path, IncomingFile, UploadReport, UploadStore, UploadedSample};
