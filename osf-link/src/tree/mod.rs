mod cache;
mod node;

pub use cache::{ChildSource, Expansion, TreeCache, TreeError};
pub use node::{NodeView, ProjectRoot, Subtree, TreeKind, TreeNode};
