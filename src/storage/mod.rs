pub mod alloc;
pub mod avl;
pub mod cache;
pub mod checksum;
pub mod commit;
pub mod concurrency;
pub mod cursor;
pub mod error;
pub mod header;
pub mod hive;
pub mod io;
pub mod layout;
pub mod node;
pub mod page;
pub mod pool;

pub use avl::NodeRef;
pub use cursor::{Cursor, Direction, NodeInfo};
pub use error::{HiveError, HiveResult};
pub use hive::{Hive, HiveConfig, OpenFlags, SelectFlags};
pub use layout::{NodeType, OffsetWidth};
pub use node::NodeValue;
