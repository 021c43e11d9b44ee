//! Global variables in a flat file.
//!
//! One variable per line, `name, type, value`, below a `# version:` comment.
//! A field holding a comma, a quote, a `#` or whitespace is quoted, with `"`
//! doubled inside. Values are written as text and read back with their
//! type's parser in [`ParseContext::Config`]; a saved value its type can't
//! parse there is skipped with a warning.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::parser::ParseContext;
use crate::types::TypeRegistry;
use crate::variables::Variables;

const HEADER: &str = concat!("# version: ", env!("CARGO_PKG_VERSION"));

fn quote(field: &str) -> String {
    if field.contains([',', '"', '#']) || field.contains(char::is_whitespace) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split a line into its fields. `None` if a quote is left open or is
/// followed by anything but the next comma.
fn split_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let mut field = String::new();
        let quoted = chars.next_if_eq(&'"').is_some();
        if quoted {
            loop {
                match chars.next()? {
                    '"' if chars.next_if_eq(&'"').is_some() => field.push('"'),
                    '"' => break,
                    c => field.push(c),
                }
            }
        }
        let more = loop {
            match chars.next() {
                None => break false,
                Some(',') => break true,
                Some(c) if quoted && c.is_whitespace() => {}
                Some(_) if quoted => return None,
                Some('"') => return None,
                Some(c) => field.push(c),
            }
        };
        fields.push(if quoted {
            field
        } else {
            field.trim_end().to_string()
        });
        if !more {
            return Some(fields);
        }
    }
}

/// Write every variable in `variables` to `path`. The file is written under
/// a temporary name first and then moved over `path`.
pub fn save(variables: &Variables, path: &Path) -> StorageResult<usize> {
    let io = |source| StorageError {
        path: path.to_path_buf(),
        source,
    };
    let entries = variables.entries();
    let mut out = String::from(HEADER);
    out.push('\n');
    for (name, value) in &entries {
        out.push_str(&format!(
            "{}, {}, {}\n",
            quote(name),
            quote(value.type_name()),
            quote(&value.as_text())
        ));
    }
    let temp = path.with_extension("csv.temp");
    fs::write(&temp, out).map_err(io)?;
    fs::rename(&temp, path).map_err(io)?;
    debug!(path = %path.display(), variables = entries.len(), "saved variables");
    Ok(entries.len())
}

/// Read a file written by [`save`] into `variables`, returning how many
/// variables were restored. A missing file restores nothing.
pub fn load(variables: &Variables, types: &TypeRegistry, path: &Path) -> StorageResult<usize> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(StorageError {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut loaded = 0;
    let mut skipped = 0;
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = split_line(line).and_then(|fields| <[String; 3]>::try_from(fields).ok());
        let Some([name, type_name, text]) = fields else {
            warn!("invalid amount of commas in line {} ('{line}')", index + 1);
            skipped += 1;
            continue;
        };
        match types.parse(&text, &type_name, ParseContext::Config) {
            Some(value) => {
                variables.set(&name, Some(value));
                loaded += 1;
            }
            None => {
                warn!(variable = name.as_str(), type_name, "can't read saved value '{text}'");
                skipped += 1;
            }
        }
    }
    debug!(path = %path.display(), loaded, skipped, "loaded variables");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry;
    use crate::value::Value;

    #[test]
    fn test_split_line() {
        assert_eq!(split_line("a, number, 5"), Some(vec!["a".into(), "number".into(), "5".into()]));
        assert_eq!(
            split_line(r#""x, y", string, "say ""hi""""#),
            Some(vec!["x, y".into(), "string".into(), "say \"hi\"".into()])
        );
        assert_eq!(split_line("a, string, "), Some(vec!["a".into(), "string".into(), String::new()]));
        assert_eq!(split_line(r#""open, string, x"#), None);
        assert_eq!(split_line(r#""a"b, string, x"#), None);
    }

    #[test]
    fn test_saved_values_come_back() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.csv");

        let saved = Variables::new();
        saved.set("score", Some(Value::Number(2.5)));
        saved.set("flags::on", Some(Value::Boolean(true)));
        saved.set("note", Some(Value::text("hi, there")));
        assert_eq!(save(&saved, &path).unwrap(), 3);
        assert!(!path.with_extension("csv.temp").exists());

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().skip(1).collect();
        assert_eq!(
            lines,
            ["flags::on, boolean, true", "note, string, \"hi, there\"", "score, number, 2.5"]
        );

        // Text has no parser in this registry, so the note is skipped.
        let restored = Variables::new();
        assert_eq!(load(&restored, registry.types(), &path).unwrap(), 2);
        assert_eq!(restored.get("score"), Some(Value::Number(2.5)));
        assert_eq!(restored.get("flags::on"), Some(Value::Boolean(true)));
        assert_eq!(restored.get("note"), None);
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.csv");
        fs::write(&path, "# version: 0\n\na, number\nb, number, 1, 2\nc, number, x\nd, number, 4\n").unwrap();
        let vars = Variables::new();
        assert_eq!(load(&vars, registry.types(), &path).unwrap(), 1);
        assert_eq!(vars.entries(), [("d".to_string(), Value::Number(4.0))]);
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vars = Variables::new();
        let loaded = load(&vars, registry().types(), &dir.path().join("none.csv")).unwrap();
        assert_eq!(loaded, 0);
        assert!(vars.is_empty());
    }
}
