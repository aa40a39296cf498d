//! Public driver (§4.4.1, §6.4): decodes one or more wire-encoded
//! `StructuredQuery` messages and emits a single SQL statement with
//! shared/nested sub-queries materialized as CTEs.

use fhm::Map;

use crate::cte::CteBuilder;
use crate::error::{SqgenError, SqgenResult};
use crate::lower::generate_sql;
use crate::schema::{self, StructuredQuery};

pub struct Generator {
    registered: Map<String, Vec<u8>>,
    referenced_modules: Vec<String>,
    preambles: Vec<String>,
}

impl Generator {
    pub fn new() -> Self {
        Generator {
            registered: Map::new(0, 75).expect("valid default load limit"),
            referenced_modules: Vec::new(),
            preambles: Vec::new(),
        }
    }

    /// Registers a shared query for later reference by `inner_query_id`
    /// or by `generate_by_id`. The encoded query must carry an `id`;
    /// re-registering the same id is a semantic error.
    pub fn add_query(&mut self, bytes: &[u8]) -> SqgenResult<()> {
        let decoded = schema::decode(bytes)?;
        let id = decoded
            .id
            .ok_or_else(|| SqgenError::semantic("add_query requires the structured query to carry an id"))?;
        if self.registered.contains(id.as_str()) {
            return Err(SqgenError::semantic(format!("duplicate query id '{}'", id)));
        }
        tracing::debug!(id = %id, "registered shared query");
        self.registered.insert(id, bytes.to_vec());
        Ok(())
    }

    fn run(&mut self, root: StructuredQuery) -> SqgenResult<String> {
        let mut cte = CteBuilder::new();
        let sql = generate_sql(&root, &mut cte, &self.registered).inspect_err(|e| {
            tracing::warn!(error = %e, "failed to lower structured query");
        })?;
        for module in cte.referenced_modules() {
            if !self.referenced_modules.iter().any(|m| m == module) {
                self.referenced_modules.push(module.clone());
            }
        }
        self.preambles.extend(cte.preambles().iter().cloned());
        Ok(sql)
    }

    pub fn generate(&mut self, root_bytes: &[u8]) -> SqgenResult<String> {
        let root = schema::decode(root_bytes)?;
        self.run(root)
    }

    pub fn generate_by_id(&mut self, id: &str) -> SqgenResult<String> {
        let bytes = self
            .registered
            .find(id)
            .ok_or_else(|| SqgenError::semantic(format!("unknown registered query id '{}'", id)))?
            .clone();
        let root = schema::decode(&bytes)?;
        self.run(root)
    }

    pub fn referenced_modules(&self) -> &[String] {
        &self.referenced_modules
    }

    pub fn preambles(&self) -> &[String] {
        &self.preambles
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec::encode;

    fn encode_table_query(id: Option<&str>, table_name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(id) = id {
            encode::write_bytes_field(&mut out, 1, id.as_bytes());
        }
        let mut table_body = Vec::new();
        encode::write_bytes_field(&mut table_body, 1, table_name.as_bytes());
        encode::write_bytes_field(&mut out, 2, &table_body);
        out
    }

    #[test]
    fn minimal_table_query_selects_star_from_the_table() {
        let mut gen = Generator::new();
        let bytes = encode_table_query(None, "slice");
        let sql = gen.generate(&bytes).unwrap();
        assert_eq!(sql, "WITH sq_0 AS (\nSELECT *\nFROM slice\n)\nSELECT *\nFROM sq_0");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut gen = Generator::new();
        let bytes = encode_table_query(Some("shared"), "slice");
        gen.add_query(&bytes).unwrap();
        let err = gen.add_query(&bytes).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn generate_by_id_runs_the_registered_query() {
        let mut gen = Generator::new();
        let bytes = encode_table_query(Some("shared"), "thread_slice");
        gen.add_query(&bytes).unwrap();
        let sql = gen.generate_by_id("shared").unwrap();
        assert_eq!(sql, "WITH sq_0 AS (\nSELECT *\nFROM thread_slice\n)\nSELECT *\nFROM sq_0");
    }

    #[test]
    fn generate_by_id_on_unknown_id_is_a_semantic_error() {
        let mut gen = Generator::new();
        let err = gen.generate_by_id("missing").unwrap_err();
        assert!(err.to_string().contains("unknown registered query id"));
    }
}
