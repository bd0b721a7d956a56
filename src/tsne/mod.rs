//! Barnes-Hut t-SNE gradient descent on a 2-D embedding

pub mod engine;
pub mod forces;
pub mod quadtree;

pub use self::engine::{tsne_gradient_descent, TsneParams, TsneResult};
pub use self::quadtree::{BoundingBox, Node, QuadTree};
