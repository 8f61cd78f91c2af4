mod hashmap;
mod deadline;

pub use hashmap::{FullHashMap, HashMap, HashSet};
pub use deadline::Deadline;
