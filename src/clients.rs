pub(crate) mod forum;
pub(crate) mod report;
pub(crate) mod vectors;

pub(crate) use forum::ForumClient;
pub(crate) use report::ReportClient;
pub(crate) use vectors::{EmbeddingProvider, VectorStoreClient};
