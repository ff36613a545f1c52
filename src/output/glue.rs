use itertools::Itertools;

/// Collects the JavaScript bodies supplied by `@Import(js = ...)` annotations and renders the
/// CommonJS glue module: an object of `{ module: { name: body } }` groups exported as the
/// default.
#[derive(Debug, Default)]
pub struct JsGlue {
    entries: Vec<(String, String, String)>,
}

impl JsGlue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: &str, name: &str, body: &str) {
        self.entries
            .push((module.to_string(), name.to_string(), body.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("module.exports = {\n");
        let grouped = self
            .entries
            .iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .group_by(|(module, _, _)| module.clone());
        for (module, entries) in &grouped {
            out.push_str(&format!("  {}: {{\n", module));
            for (_, name, body) in entries {
                out.push_str(&format!("    {}: {},\n", name, body));
            }
            out.push_str("  },\n");
        }
        out.push_str("};\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_grouped_commonjs_object() {
        let mut glue = JsGlue::new();
        glue.add("M", "f", "(x)=>x+1");
        glue.add("M", "g", "()=>0");
        let rendered = glue.render();
        assert!(rendered.starts_with("module.exports = {"));
        assert!(rendered.contains("M: {"));
        assert!(rendered.contains("f: (x)=>x+1,"));
        assert!(rendered.contains("g: ()=>0,"));
    }
}
