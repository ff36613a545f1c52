use std::collections::HashMap;
use std::fmt::Write;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encodes one value as VLQ base64: the sign in the lowest bit, then 5-bit groups with a
/// continuation flag.
fn write_vlq(out: &mut String, value: i64) {
    let mut value = if value < 0 {
        ((-value as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (value & 0x1F) as usize;
        value >>= 5;
        if value > 0 {
            digit |= 0x20;
        }
        out.push(BASE64[digit] as char);
        if value == 0 {
            break;
        }
    }
}

/// Accumulates `(generated column, source line, source file)` triples and renders a V3 source
/// map.
///
/// The generated line is always 1 for WebAssembly, so the mappings string is a single run of
/// comma-separated segments. Source files deduplicate in first-seen order; source columns are
/// always 0 because JVM line tables carry no column information.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    source_indices: HashMap<String, u32>,
    /// `(generated column, source index, source line)` in addition order.
    mappings: Vec<(u32, u32, u32)>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn add_mapping(&mut self, generated_column: u32, source_file: &str, source_line: u32) {
        let sources = &mut self.sources;
        let index = *self
            .source_indices
            .entry(source_file.to_string())
            .or_insert_with(|| {
                sources.push(source_file.to_string());
                sources.len() as u32 - 1
            });
        self.mappings.push((generated_column, index, source_line));
    }

    /// Renders the map as V3 JSON. `source_base` is prepended to every source file name.
    pub fn render(&self, source_base: &str) -> String {
        let mut mappings = String::new();
        let mut last_column = 0i64;
        let mut last_source = 0i64;
        let mut last_line = 0i64;
        for (i, &(column, source, line)) in self.mappings.iter().enumerate() {
            if i > 0 {
                mappings.push(',');
            }
            // Source lines are 1-based in the table, 0-based in the map
            let line = line.saturating_sub(1) as i64;
            write_vlq(&mut mappings, column as i64 - last_column);
            write_vlq(&mut mappings, source as i64 - last_source);
            write_vlq(&mut mappings, line - last_line);
            write_vlq(&mut mappings, 0);
            last_column = column as i64;
            last_source = source as i64;
            last_line = line;
        }

        let mut sources = String::new();
        for (i, file) in self.sources.iter().enumerate() {
            if i > 0 {
                sources.push(',');
            }
            write!(sources, "{:?}", format!("{}{}", source_base, file)).unwrap();
        }
        format!(
            "{{\"version\":3,\"sources\":[{}],\"names\":[],\"mappings\":\"{}\"}}",
            sources, mappings
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_encodes_known_values() {
        let mut out = String::new();
        write_vlq(&mut out, 0);
        assert_eq!(out, "A");
        let mut out = String::new();
        write_vlq(&mut out, 1);
        assert_eq!(out, "C");
        let mut out = String::new();
        write_vlq(&mut out, -1);
        assert_eq!(out, "D");
        let mut out = String::new();
        write_vlq(&mut out, 16);
        assert_eq!(out, "gB");
    }

    #[test]
    fn segments_are_delta_encoded() {
        let mut map = SourceMapBuilder::new();
        map.add_mapping(10, "Test.java", 1);
        map.add_mapping(14, "Test.java", 3);
        let rendered = map.render("");
        // First segment absolute (10, 0, 0, 0), second delta (4, 0, 2, 0)
        assert!(rendered.contains("\"mappings\":\"UAAA,IAEA\""));
        assert!(rendered.contains("\"sources\":[\"Test.java\"]"));
        assert!(rendered.contains("\"version\":3"));
        assert!(rendered.contains("\"names\":[]"));
    }

    #[test]
    fn source_base_prefixes_files() {
        let mut map = SourceMapBuilder::new();
        map.add_mapping(0, "Test.java", 1);
        let rendered = map.render("src/");
        assert!(rendered.contains("\"src/Test.java\""));
    }
}
