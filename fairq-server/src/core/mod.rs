pub mod error;
pub mod keys;
pub mod kv;
pub mod scripts;

pub use error::BrokerError;
pub use keys::KeyLayout;
pub use kv::{Keyspace, KvEngine, unix_now};
