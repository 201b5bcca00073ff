//! Merges `filters.d/*.{yaml,yml}` rule files into `filters.rules`.

use super::validation::ConfigWarning;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

/// Read `dir`, sorted lexicographically, skipping dotfiles/underscore-prefixed
/// files and anything that isn't `.yaml`/`.yml`. Each file is expected to
/// parse into a YAML sequence of rule mappings; a file that fails to parse or
/// doesn't hold a sequence is recorded as a warning and skipped — it MUST NOT
/// abort the merge of the remaining files.
pub fn load_rule_files(dir: &Path) -> (Vec<Value>, Vec<ConfigWarning>) {
    let mut rules = Vec::new();
    let mut warnings = Vec::new();

    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return (rules, warnings),
    };
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "yaml" && ext != "yml" {
            continue;
        }

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warnings.push(ConfigWarning::new(format!(
                    "failed to read filter file {name}: {e}"
                )));
                continue;
            }
        };
        match serde_yaml::from_str::<Value>(&contents) {
            Ok(Value::Sequence(seq)) => rules.extend(seq),
            Ok(_) => warnings.push(ConfigWarning::new(format!(
                "filter file {name} must contain a YAML sequence of rules"
            ))),
            Err(e) => warnings.push(ConfigWarning::new(format!(
                "failed to parse filter file {name}: {e}"
            ))),
        }
    }

    (rules, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merges_sorted_and_skips_hidden_and_bad_ext() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("b.yaml"), "- {name: b, enabled: true, filter: {field: x, op: eq, value: 1}}\n");
        write(&dir.path().join("a.yml"), "- {name: a, enabled: true, filter: {field: y, op: eq, value: 2}}\n");
        write(&dir.path().join("_skip.yaml"), "- {name: skip}\n");
        write(&dir.path().join(".hidden.yaml"), "- {name: hidden}\n");
        write(&dir.path().join("notes.txt"), "not yaml\n");

        let (rules, warnings) = load_rule_files(dir.path());
        assert_eq!(rules.len(), 2);
        assert!(warnings.is_empty());
        let first_name = rules[0].get("name").unwrap().as_str().unwrap();
        assert_eq!(first_name, "a");
    }

    #[test]
    fn bad_file_produces_warning_without_aborting_others() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.yaml"), "not: [valid, yaml structure for a rule list\n");
        write(&dir.path().join("b.yaml"), "- {name: ok, enabled: true, filter: {field: z, op: eq, value: 3}}\n");

        let (rules, warnings) = load_rule_files(dir.path());
        assert_eq!(rules.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_dir_yields_empty_without_panicking() {
        let (rules, warnings) = load_rule_files(Path::new("/nonexistent/path/for/crowdsieve"));
        assert!(rules.is_empty());
        assert!(warnings.is_empty());
    }

    fn write(path: &Path, content: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }
}
