pub mod id;

pub use id::{generate_id, CorrelationId, SubjectId, UploadId};
