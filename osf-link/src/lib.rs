pub mod config;
pub mod links;
pub mod session;
pub mod token_provider;
pub mod tree;

pub use config::LinkConfig;
pub use links::{AssociationError, AssociationIndex, LinkingFile};
pub use session::{LinkSession, SessionError, UnlinkReport};
pub use token_provider::TokenProvider;
pub use tree::{
    ChildSource, Expansion, NodeView, ProjectRoot, Subtree, TreeCache, TreeError, TreeKind,
    TreeNode,
};
