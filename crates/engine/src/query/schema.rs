//! Graph vocabulary and prompts for query planning.

/// Curated schema description given to the planner model.
pub const SCHEMA_HINT: &str = "\
NODOS:
- :ContratoRAG (un contrato o licitación)
  Propiedades: expediente (str), titulo (str), valor_estimado (float), presupuesto_sin_iva (float), cpv_principal (str), contract_uri (str)
- :EmpresaRAG (una empresa adjudicataria)
  Propiedades: nombre (str), nif (str)

RELACIONES:
- (:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(:ContratoRAG)
  Propiedad de r: importe_adjudicado (float), el importe por el que se ganó el contrato.

IMPORTES:
- \"importe adjudicado\" o \"importe contratado\": usa r.importe_adjudicado.
- \"facturación\": suma r.importe_adjudicado.
- \"valor estimado\" o presupuesto base: c.valor_estimado o c.presupuesto_sin_iva.

DIRECCIÓN:
- La relación solo existe en este sentido: (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c:ContratoRAG).
- Nunca escribas (c:ContratoRAG)-[:ADJUDICATARIA_RAG]->(e:EmpresaRAG): devuelve 0 filas.
- Si usas r.<propiedad>, declara la relación como [r:ADJUDICATARIA_RAG].

LISTADOS:
- Para listar contratos usa DISTINCT sobre c.expediente para no repetir contratos adjudicados a una UTE.

TIPO DE CONTRATO (CPV):
- cpv_principal puede ser número o texto: compara siempre toString(c.cpv_principal).
- Obras: toString(c.cpv_principal) STARTS WITH '45'
- Suministros: toString(c.cpv_principal) < '45'
- Servicios: toString(c.cpv_principal) >= '50'

AÑO:
- No hay campo de fecha. El año va al inicio del expediente.
- Año 2024: c.expediente STARTS WITH '24' OR c.expediente STARTS WITH '2024'
";

pub const PLANNER_SYSTEM: &str = "Devuelve SOLO JSON válido.";

/// Expected reply shape, also used by the JSON repair prompt.
pub const PLAN_SHAPE: &str = r#"{"cypher": "<consulta Cypher de solo lectura>", "params": {}}"#;

pub fn planner_prompt(question: &str, today: &str, error_hint: Option<&str>) -> String {
    let mut prompt = format!(
        "Eres un experto en Neo4j. Traduce la pregunta a UNA consulta Cypher de solo lectura \
         (MATCH ... RETURN). Nunca uses CREATE, MERGE, SET, DELETE, REMOVE, DROP ni CALL a \
         procedimientos. Usa parámetros ($nombre) para los valores literales cuando puedas.\n\n\
         Fecha de hoy: {today}\n\n\
         ESQUEMA:\n{SCHEMA_HINT}\n\
         Responde con este JSON: {PLAN_SHAPE}\n"
    );
    if let Some(hint) = error_hint {
        prompt.push_str(&format!("\nError previo a corregir: {hint}\n"));
    }
    prompt.push_str(&format!("\nPregunta: {question}"));
    prompt
}

pub const EXPLAIN_SYSTEM: &str = "Eres un analista de contratación pública. Explica en español, \
     de forma breve y clara, los resultados de la consulta. Usa solo los datos de la tabla; \
     no inventes cifras. Responde en texto, nunca en JSON.";

pub fn explain_prompt(question: &str, table: &str, total_rows: usize) -> String {
    format!(
        "Pregunta: {question}\n\nResultados ({total_rows} filas):\n{table}\n\n\
         Resume la respuesta a la pregunta a partir de estos resultados."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_schema_and_error_hint() {
        let prompt = planner_prompt("Top 10 empresas", "2025-03-01", Some("missing RETURN clause"));
        assert!(prompt.contains("ADJUDICATARIA_RAG"));
        assert!(prompt.contains("Error previo a corregir: missing RETURN clause"));
        assert!(prompt.ends_with("Pregunta: Top 10 empresas"));
        assert!(!planner_prompt("q", "hoy", None).contains("Error previo"));
    }
}
