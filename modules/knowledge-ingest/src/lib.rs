pub mod classifier;
pub mod pipeline;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use classifier::{ClassificationClient, ModelBackend};
pub use pipeline::Pipeline;
pub use store::{ArticleStore, SqliteStore, StoreError, StoredArticle};
