//! Start-up probe for a local Ollama server.
//!
//! Lists the locally downloaded models from `/api/tags` so the operator
//! learns before the first question whether the configured model exists.

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

/// Ping the Ollama server and return the list of available models.
///
/// Blocking; call before the async runtime starts.
pub fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::blocking::get(&url)
        .map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

    Ok(tags.models)
}

/// Whether `wanted` is among `models`. An untagged name matches its
/// `:latest` tag, the way `ollama run` resolves it.
pub fn has_model(models: &[OllamaModel], wanted: &str) -> bool {
    models.iter().any(|m| {
        m.name == wanted || (!wanted.contains(':') && m.name == format!("{wanted}:latest"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(names: &[&str]) -> Vec<OllamaModel> {
        names.iter().map(|n| OllamaModel { name: n.to_string() }).collect()
    }

    #[test]
    fn exact_tag_matches() {
        let m = models(&["deepseek-r1:1.5b", "llama3:latest"]);
        assert!(has_model(&m, "deepseek-r1:1.5b"));
        assert!(!has_model(&m, "deepseek-r1:7b"));
    }

    #[test]
    fn untagged_name_matches_latest() {
        let m = models(&["llama3:latest"]);
        assert!(has_model(&m, "llama3"));
        assert!(!has_model(&m, "llama"));
    }

    #[test]
    fn tags_response_parses() {
        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3:latest","size":1}]}"#).unwrap();
        assert_eq!(tags.models[0].name, "llama3:latest");
    }

    #[test]
    fn unreachable_server_is_an_error() {
        assert!(fetch_models("http://127.0.0.1:9").is_err());
    }
}
