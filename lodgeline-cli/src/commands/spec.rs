//! Writes the OpenAPI document to a file or stdout.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use server::openapi::ApiDoc;
use utoipa::OpenApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn render(format: Format) -> Result<String> {
    let openapi = ApiDoc::openapi();
    Ok(match format {
        Format::Json => openapi.to_pretty_json()?,
        Format::Yaml => serde_yml::to_string(&openapi)?,
    })
}

/// `None` and `"yaml"` print YAML, `"json"` prints JSON; anything else is a
/// file path whose extension picks the format.
///
/// # Errors
/// Returns an error if the document cannot be serialized or written.
pub fn generate_spec(output_path: Option<&str>) -> Result<()> {
    match output_path {
        Some("json") => io::stdout().write_all(render(Format::Json)?.as_bytes())?,
        Some("yaml") | None => io::stdout().write_all(render(Format::Yaml)?.as_bytes())?,
        Some(path) => {
            let path = Path::new(path);
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => Format::Json,
                _ => Format::Yaml,
            };
            fs::write(path, render(format)?)?;
            println!("OpenAPI spec written to {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn writes_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openapi.json");

        generate_spec(path.to_str()).unwrap();

        let document: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["info"]["title"], "Lodgeline API");
        assert!(document["paths"]["/api/mercure-token"].is_object());
    }

    #[test]
    fn yaml_and_json_describe_the_same_paths() {
        let json: Value = serde_json::from_str(&render(Format::Json).unwrap()).unwrap();
        let yaml: Value = serde_yml::from_str(&render(Format::Yaml).unwrap()).unwrap();
        assert_eq!(json["paths"], yaml["paths"]);
    }
}
