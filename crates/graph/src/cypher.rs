//! Read-only Cypher statements used by the Neo4j store.
//!
//! Every statement here is fixed text with `$parameters`; nothing user
//! supplied is ever spliced into the query string.

use procura_core::Tier;

/// Fields returned for a contract row, shared by search and lookups.
const CONTRACT_PROJECTION: &str = "c.contract_id AS contract_id, \
    c.expediente AS expediente, \
    c.titulo AS titulo, \
    c.abstract AS abstract, \
    c.cpv_principal AS cpv_principal, \
    c.link_contrato AS link_contrato, \
    e.nif AS adjudicataria_nif, \
    e.nombre AS adjudicataria_nombre, \
    r.importe_adjudicado AS importe_adjudicado";

/// Contract tier similarity search.
pub fn search_contracts() -> String {
    format!(
        "CALL db.index.vector.queryNodes('{index}', $k_query, $embedding) YIELD node AS c, score \
         WHERE ($expedientes IS NULL OR c.expediente IN $expedientes) \
         OPTIONAL MATCH (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c) \
         RETURN {CONTRACT_PROJECTION}, score \
         ORDER BY score DESC LIMIT $k",
        index = Tier::Contract.vector_index()
    )
}

/// Chapter tier similarity search.
pub fn search_chapters() -> String {
    format!(
        "CALL db.index.vector.queryNodes('{index}', $k_query, $embedding) YIELD node, score \
         MATCH (c:ContratoRAG)-[td:TIENE_DOC]->(d:DocumentoRAG)-[:TIENE_CAPITULO]->(node) \
         WHERE ($doc_tipo IS NULL OR td.tipo_doc = $doc_tipo) \
         AND ($expedientes IS NULL OR c.expediente IN $expedientes) \
         RETURN node.cap_id AS cap_id, node.heading AS heading, node.texto AS texto, \
         td.tipo_doc AS tipo_doc, c.contract_id AS contract_id, c.expediente AS expediente, \
         c.titulo AS contrato_titulo, score \
         ORDER BY score DESC LIMIT $k",
        index = Tier::Chapter.vector_index()
    )
}

/// Excerpt tier similarity search.
pub fn search_excerpts() -> String {
    format!(
        "CALL db.index.vector.queryNodes('{index}', $k_query, $embedding) YIELD node, score \
         MATCH (c:ContratoRAG)-[td:TIENE_DOC]->(d:DocumentoRAG)-[:TIENE_EXTRACTO]->(node) \
         WHERE ($doc_tipo IS NULL OR td.tipo_doc = $doc_tipo) \
         AND ($expedientes IS NULL OR c.expediente IN $expedientes) \
         AND ($tipos IS NULL OR node.tipo IN $tipos) \
         RETURN node.extracto_id AS extracto_id, node.tipo AS tipo, node.texto AS texto, \
         c.contract_id AS contract_id, c.expediente AS expediente, \
         c.titulo AS contrato_titulo, score \
         ORDER BY score DESC LIMIT $k",
        index = Tier::Excerpt.vector_index()
    )
}

/// The search statement for a tier.
pub fn search_for(tier: Tier) -> String {
    match tier {
        Tier::Contract => search_contracts(),
        Tier::Chapter => search_chapters(),
        Tier::Excerpt => search_excerpts(),
    }
}

/// Candidates pulled from the index before graph-side filtering.
///
/// Filters discard most index hits, so a filtered search over-fetches.
pub fn k_query(k: usize, filtered: bool) -> usize {
    if filtered { (k * 25).max(200) } else { k }
}

/// Contract by id or case file.
pub fn lookup_case_file() -> String {
    format!(
        "MATCH (c:ContratoRAG) \
         WHERE c.contract_id = $q OR c.expediente = $q OR c.expediente CONTAINS $q \
         OPTIONAL MATCH (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c) \
         RETURN {CONTRACT_PROJECTION} \
         LIMIT $limit"
    )
}

/// Contracts awarded to a tax id, largest award first.
pub fn lookup_tax_id() -> String {
    format!(
        "MATCH (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c:ContratoRAG) \
         WHERE e.nif = $q \
         RETURN {CONTRACT_PROJECTION} \
         ORDER BY r.importe_adjudicado DESC \
         LIMIT $limit"
    )
}

/// Nearest contract that owns a technical document (`PPT`).
pub fn nearest_reference() -> String {
    format!(
        "CALL db.index.vector.queryNodes('{index}', $k_query, $embedding) YIELD node, score \
         MATCH (c:ContratoRAG)-[td:TIENE_DOC]->(d:DocumentoRAG)-[:TIENE_CAPITULO]->(node) \
         WHERE td.tipo_doc = 'PPT' \
         RETURN c.contract_id AS contract_id, score \
         ORDER BY score DESC LIMIT 1",
        index = Tier::Chapter.vector_index()
    )
}

/// Technical document chapters of one contract, in document order.
pub const REFERENCE_CHAPTERS: &str = "MATCH (c:ContratoRAG)-[td:TIENE_DOC]->(d:DocumentoRAG) \
     WHERE (c.contract_id = $cid OR c.expediente = $cid) AND td.tipo_doc = 'PPT' \
     OPTIONAL MATCH (d)-[:TIENE_CAPITULO]->(cap:Capitulo) \
     RETURN c.contract_id AS contract_id, c.expediente AS expediente, c.titulo AS titulo, \
     c.link_contrato AS link_contrato, cap.heading AS heading, cap.orden AS orden, \
     cap.texto AS texto \
     ORDER BY cap.orden";

/// Connectivity check.
pub const PING: &str = "RETURN 1 AS ok";
