//! Workload lists and network maps supplied as files or repeated flags

use std::collections::HashMap;
use std::path::Path;

use vmigrate_core::types::NetworkMapping;

use crate::error::{CliError, CliResult};

/// Parse a workload list: one name per line
///
/// `#` starts a comment at the beginning of a line or after whitespace, so
/// names such as `db#2` survive intact.
pub fn parse_workload_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| strip_comment(line).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    let mut previous: Option<char> = None;
    for (index, c) in line.char_indices() {
        if c == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..index];
        }
        previous = Some(c);
    }
    line
}

pub fn read_workload_file(path: &Path) -> CliResult<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_workload_list(&contents))
}

/// Load a `source: target` map from a YAML or JSON file
///
/// Files ending in `.json` are parsed as JSON, everything else as YAML.
pub fn read_network_map_file(path: &Path) -> CliResult<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed: HashMap<String, String> = if is_json {
        serde_json::from_str(&contents).map_err(|e| CliError::NetworkMapFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&contents).map_err(|e| CliError::NetworkMapFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };

    let mut entries: Vec<(String, String)> = parsed
        .into_iter()
        .map(|(source, target)| (source.trim().to_string(), target.trim().to_string()))
        .collect();
    if let Some((source, _)) = entries.iter().find(|(s, t)| s.is_empty() || t.is_empty()) {
        return Err(CliError::NetworkMapFile {
            path: path.to_path_buf(),
            message: format!("empty network name in entry '{}'", source),
        });
    }
    entries.sort();
    Ok(entries)
}

/// Combine a map file with `SRC=DST` flags; flags win on conflict
pub fn collect_network_mapping(
    file: Option<&Path>,
    entries: &[String],
) -> CliResult<NetworkMapping> {
    let mut mapping = NetworkMapping::new();
    if let Some(path) = file {
        for (source, target) in read_network_map_file(path)? {
            mapping.insert(source, target);
        }
    }
    for entry in entries {
        let (source, target) = NetworkMapping::parse_entry(entry)?;
        mapping.insert(source, target);
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_workload_list_skips_comments_and_blanks() {
        let contents = "# batch one\nweb01\n\n  app01  \ndb01 # primary\n#db02\n";
        assert_eq!(parse_workload_list(contents), vec!["web01", "app01", "db01"]);
    }

    #[test]
    fn test_hash_inside_a_name_is_kept() {
        let contents = "db#2\n  #commented\nweb#01 # trailing\napp01\t# tabbed\n";
        assert_eq!(parse_workload_list(contents), vec!["db#2", "web#01", "app01"]);
    }

    #[test]
    fn test_network_map_from_yaml_and_flags() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "Prod-A: Prod-B\n\"VM Network\": VM-DV").unwrap();

        let mapping = collect_network_mapping(
            Some(file.path()),
            &["Prod-A=Prod-C".to_string(), "Dev=Dev-DV".to_string()],
        )
        .unwrap();

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.target_for("Prod-A"), "Prod-C");
        assert_eq!(mapping.target_for("VM Network"), "VM-DV");
        assert_eq!(mapping.target_for("Dev"), "Dev-DV");
        assert_eq!(mapping.target_for("Other"), "Other");
    }

    #[test]
    fn test_network_map_from_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"Prod-A": "Prod-B"}}"#).unwrap();

        let entries = read_network_map_file(file.path()).unwrap();
        assert_eq!(entries, vec![("Prod-A".to_string(), "Prod-B".to_string())]);
    }

    #[test]
    fn test_bad_inputs_are_rejected() {
        assert!(collect_network_mapping(None, &["no-equals".to_string()]).is_err());
        assert!(collect_network_mapping(None, &["=target".to_string()]).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "- not\n- a map").unwrap();
        let err = read_network_map_file(file.path()).unwrap_err();
        assert!(matches!(err, CliError::NetworkMapFile { .. }));

        let err = read_workload_file(Path::new("/nonexistent/vms.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vms.txt"));
    }
}
