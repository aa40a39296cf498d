//! CTE naming, shared-query dedup, and cycle detection (§4.4.1/§4.4.2):
//! every lowered query becomes one `WITH` entry, emitted once, named
//! either `shared_sq_<id>` (a query with an explicit id, potentially
//! referenced from more than one place) or `sq_<n>` (anonymous, a
//! fresh entry every time it's lowered).

use fhm::Map;

use crate::error::{SqgenError, SqgenResult};

pub struct CteBuilder {
    order: Vec<String>,
    bodies: Map<String, String>,
    used_names: Map<String, ()>,
    by_id: Map<String, String>,
    visiting: Vec<String>,
    next_anon: usize,
    referenced_modules: Vec<String>,
    preambles: Vec<String>,
}

impl CteBuilder {
    pub fn new() -> Self {
        CteBuilder {
            order: Vec::new(),
            bodies: Map::new(0, 75).expect("valid default load limit"),
            used_names: Map::new(0, 75).expect("valid default load limit"),
            by_id: Map::new(0, 75).expect("valid default load limit"),
            visiting: Vec::new(),
            next_anon: 0,
            referenced_modules: Vec::new(),
            preambles: Vec::new(),
        }
    }

    fn unique_name(&mut self, base: &str) -> String {
        if !self.used_names.contains(base) {
            self.used_names.insert(base.to_string(), ());
            return base.to_string();
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.used_names.contains(candidate.as_str()) {
                self.used_names.insert(candidate.clone(), ());
                return candidate;
            }
            n += 1;
        }
    }

    /// Call before lowering a query that carries id `id`. `Ok(Some(name))`
    /// means it's already materialized (or in progress) — reuse that
    /// name and skip re-lowering. `Ok(None)` means this is the first
    /// time: proceed to lower the query body, then call
    /// [`CteBuilder::finish_shared`]. `Err` means `id` is already being
    /// lowered further up the call stack (a cycle).
    pub fn begin_shared(&mut self, id: &str) -> SqgenResult<Option<String>> {
        if let Some(name) = self.by_id.find(id) {
            return Ok(Some(name.clone()));
        }
        if self.visiting.iter().any(|v| v == id) {
            return Err(SqgenError::semantic(format!(
                "Cycle detected in structured query dependencies involving query with id '{}'",
                id
            )));
        }
        self.visiting.push(id.to_string());
        Ok(None)
    }

    pub fn finish_shared(&mut self, id: &str, body: String) -> String {
        self.visiting.retain(|v| v != id);
        let name = self.unique_name(&format!("shared_sq_{}", id));
        self.by_id.insert(id.to_string(), name.clone());
        self.bodies.insert(name.clone(), body);
        self.order.push(name.clone());
        name
    }

    pub fn emit_anonymous(&mut self, body: String) -> String {
        let idx = self.next_anon;
        self.next_anon += 1;
        let name = self.unique_name(&format!("sq_{}", idx));
        self.bodies.insert(name.clone(), body);
        self.order.push(name.clone());
        name
    }

    pub fn note_referenced_module(&mut self, module: &str) {
        if !self.referenced_modules.iter().any(|m| m == module) {
            self.referenced_modules.push(module.to_string());
        }
    }

    pub fn referenced_modules(&self) -> &[String] {
        &self.referenced_modules
    }

    pub fn add_preamble(&mut self, text: String) {
        self.preambles.push(text);
    }

    pub fn preambles(&self) -> &[String] {
        &self.preambles
    }

    /// Renders every materialized query as one `WITH` clause, in the
    /// order they were first lowered (dependencies always precede their
    /// dependents, since a query can't reference a CTE that doesn't
    /// exist yet).
    pub fn render_with_clause(&self) -> String {
        if self.order.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .order
            .iter()
            .map(|name| format!("{} AS (\n{}\n)", name, self.bodies.find(name).expect("every ordered name has a body")))
            .collect();
        format!("WITH {}\n", parts.join(",\n"))
    }
}

impl Default for CteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_queries_get_distinct_sequential_names() {
        let mut cte = CteBuilder::new();
        let a = cte.emit_anonymous("SELECT 1".to_string());
        let b = cte.emit_anonymous("SELECT 2".to_string());
        assert_eq!(a, "sq_0");
        assert_eq!(b, "sq_1");
    }

    #[test]
    fn shared_query_is_materialized_once() {
        let mut cte = CteBuilder::new();
        assert!(cte.begin_shared("x").unwrap().is_none());
        let name = cte.finish_shared("x", "SELECT 1".to_string());
        assert_eq!(name, "shared_sq_x");
        assert_eq!(cte.begin_shared("x").unwrap(), Some(name));
        assert_eq!(cte.render_with_clause().matches("shared_sq_x").count(), 1);
    }

    #[test]
    fn revisiting_an_in_progress_id_is_a_cycle() {
        let mut cte = CteBuilder::new();
        assert!(cte.begin_shared("a").unwrap().is_none());
        let err = cte.begin_shared("a").unwrap_err();
        assert!(err.to_string().contains("Cycle detected in structured query dependencies"));
    }
}
