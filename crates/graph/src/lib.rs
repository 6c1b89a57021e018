//! Knowledge-graph stores for procura.
//!
//! Both stores implement `procura_core::GraphStore`.

pub mod cypher;
pub mod in_memory;
pub mod neo4j;
pub mod similarity;

pub use in_memory::InMemoryGraph;
pub use neo4j::Neo4jHttpStore;
pub use similarity::cosine_similarity;
