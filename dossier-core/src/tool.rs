use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// LLM-facing description of one callable function.
///
/// `parameters` is the shared declaration shape
/// `{type, properties, required[]}`; each provider renames the key it nests
/// this under (`input_schema`, `parameters`, `functionDeclarations`).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub const LIST_FILES: &str = "list-files";
pub const READ_FILES: &str = "read-files";
pub const SEARCH_FILES: &str = "search-files";
pub const WRITE_FILE: &str = "write-file";
pub const DELETE_FILES: &str = "delete-files";
pub const MOVE_FILES: &str = "move-files";

/// Arguments for `list-files`. The operation takes no input; the empty
/// object keeps every provider's declaration shape uniform.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListFilesArgs {}

/// Arguments for `read-files`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadFilesArgs {
    /// Relative paths of the files to read
    pub file_paths: Vec<String>,
}

/// Arguments for `search-files`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchFilesArgs {
    /// Terms to look for; each is matched as a plain substring
    pub search_terms: Vec<String>,
}

/// Arguments for `write-file`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Relative path of the file to create or overwrite
    pub file_path: String,
    /// Full new file content
    pub content: String,
}

/// Arguments for `delete-files`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteFilesArgs {
    /// Relative paths of the files to delete
    pub file_paths: Vec<String>,
    /// Must be true; deletion is refused otherwise
    pub confirm_deletion: bool,
}

/// Arguments for `move-files`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveFilesArgs {
    /// Current relative paths
    pub source_paths: Vec<String>,
    /// New relative paths, one per source
    pub destination_paths: Vec<String>,
}

/// Generates the declaration schema for an argument type.
///
/// Strips the metadata keys schemars adds; one provider rejects schema
/// fields it does not recognize.
fn schema_for<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    let mut value = match serde_json::to_value(root.schema) {
        Ok(value) => value,
        Err(e) => {
            warn!("schema generation failed: {e}");
            serde_json::json!({ "type": "object", "properties": {} })
        }
    };
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        if !object.contains_key("properties") {
            object.insert("properties".to_string(), serde_json::json!({}));
        }
    }
    value
}

fn spec<T: JsonSchema>(name: &str, description: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: schema_for::<T>(),
    }
}

/// The full file-tool catalog.
///
/// Request builders withhold the delete declaration when destructive access
/// is off, so the model cannot even request a deletion; see
/// [`crate::provider::declared_tools`].
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        spec::<ListFilesArgs>(
            LIST_FILES,
            "List every file in the workspace with its size and modification time.",
        ),
        spec::<ReadFilesArgs>(
            READ_FILES,
            "Read the full contents of one or more workspace files.",
        ),
        spec::<SearchFilesArgs>(
            SEARCH_FILES,
            "Search workspace files for the given terms and return matching lines.",
        ),
        spec::<WriteFileArgs>(
            WRITE_FILE,
            "Create or overwrite a single workspace file with the given content.",
        ),
        spec::<MoveFilesArgs>(
            MOVE_FILES,
            "Move or rename workspace files. Source and destination lists must pair up one to one.",
        ),
        spec::<DeleteFilesArgs>(
            DELETE_FILES,
            "Permanently delete workspace files. Requires confirm_deletion to be true.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_declarations_have_the_shared_shape() {
        for tool in catalog() {
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
            assert!(tool.parameters.get("properties").is_some(), "{}", tool.name);
            assert!(tool.parameters.get("$schema").is_none());
            assert!(tool.parameters.get("title").is_none());
            assert!(!tool.description.is_empty());
        }
    }

    #[test]
    fn required_fields_match_argument_structs() {
        let tools = catalog();
        let read = tools.iter().find(|t| t.name == READ_FILES).unwrap();
        let required = read.parameters["required"].as_array().unwrap();
        assert_eq!(required, &vec![serde_json::json!("file_paths")]);

        let delete = tools.iter().find(|t| t.name == DELETE_FILES).unwrap();
        let required: Vec<_> = delete.parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"file_paths"));
        assert!(required.contains(&"confirm_deletion"));
    }

    #[test]
    fn catalog_covers_the_whole_function_surface() {
        let names: Vec<_> = catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                LIST_FILES,
                READ_FILES,
                SEARCH_FILES,
                WRITE_FILE,
                MOVE_FILES,
                DELETE_FILES
            ]
        );
    }
}
