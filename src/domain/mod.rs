pub mod model;
pub mod ports;

pub use model::{FetchPage, RawRecord, Row, Value};
pub use ports::{DatasetTransformer, Fetch, FetchOptions};
